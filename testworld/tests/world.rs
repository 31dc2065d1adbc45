//! End-to-end tests: worlds against the simulated provider.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use testworld::sim::{SimConfig, SimProvider};
use testworld::{ContainerSpec, ExecProbe, World, WorldConfig, WorldError};

fn latency(ms: u64) -> SimConfig {
    SimConfig::instant().with_latency(Duration::from_millis(ms), Duration::ZERO)
}

async fn world(name: &str, sim: &Arc<SimProvider>) -> World {
    World::new(WorldConfig::new(name), sim.clone()).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replica_count_matches_slots_and_handles() {
    let sim = SimProvider::shared(latency(5));
    let mut w = world("Replicas", &sim).await;

    for n in [1, 2, 5] {
        let group = w.new_container(ContainerSpec::image("alpine").replicas(n)).await;
        assert_eq!(group.members().len(), n);

        let ids: HashSet<_> = group.handles().await.unwrap().into_iter().map(|h| h.id).collect();
        assert_eq!(ids.len(), n);
    }

    w.destroy().await;
    assert!(sim.live_containers().is_empty());
}

#[tokio::test]
async fn test_group_name_resolves_to_every_replica() {
    let sim = SimProvider::shared(SimConfig::instant());
    let mut w = world("Dns", &sim).await;

    let servers = w
        .new_container(ContainerSpec::image("caddy:2").started().replicas(3))
        .await;
    let single = w.new_container(ContainerSpec::image("redis").started()).await;
    let client = w.new_container(ContainerSpec::image("alpine").started()).await;

    servers.await_ready().await.unwrap();
    single.await_ready().await.unwrap();

    let net = w.network().name.clone();
    let addresses: HashSet<_> = sim.lookup(&net, servers.name()).into_iter().collect();
    assert_eq!(addresses.len(), 3);

    // A single member is addressed by the group name itself.
    assert_eq!(single.member_names(), vec![single.name()]);
    assert_eq!(sim.lookup(&net, single.name()).len(), 1);

    client.exec(["nslookup", servers.name()], 0).await.unwrap();
    client.exec(["ping", "-c", "1", single.name()], 0).await.unwrap();

    w.destroy().await;
}

#[tokio::test]
async fn test_same_kind_groups_get_increasing_names() {
    let sim = SimProvider::shared(SimConfig::instant());
    let mut w = world("Names", &sim).await;

    let first = w.new_container(ContainerSpec::image("alpine:latest")).await;
    let second = w.new_container(ContainerSpec::image("alpine:3.19")).await;

    assert_eq!(first.name(), "Names-alpine-1");
    assert_eq!(second.name(), "Names-alpine-2");

    w.destroy().await;
}

#[tokio::test]
async fn test_resolving_twice_provisions_once() {
    let sim = SimProvider::shared(latency(10));
    let mut w = world("Idempotent", &sim).await;

    let group = w.new_container(ContainerSpec::image("alpine")).await;
    let slot = &group.members()[0];

    let first = slot.resolve().await;
    let second = slot.resolve().await;
    assert_eq!(first, second);
    assert!(first.is_ok());
    assert_eq!(sim.stats().creates, 1);

    w.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_member_fails_fast() {
    let sim = SimProvider::shared(latency(10));
    sim.fail_create("Fast-alpine-1-2", "manifest unknown");
    sim.set_create_latency("Fast-alpine-1-3", Duration::from_secs(2));
    let mut w = world("Fast", &sim).await;

    let group = w
        .new_container(ContainerSpec::image("alpine").started().replicas(3))
        .await;

    let started = Instant::now();
    let err = group.exec(["true"], 0).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(err.member(), Some("Fast-alpine-1-2"));
    assert!(matches!(err, WorldError::Provision { ref group, .. } if group == "Fast-alpine-1"));
    assert!(err.to_string().contains("manifest unknown"));

    w.destroy().await;
    assert_eq!(sim.live_containers(), Vec::<String>::new());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_event_ids_are_contiguous() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimProvider::shared(SimConfig::default().with_seed(7));
    let mut w = World::new(WorldConfig::new("Ids").with_log_dir(dir.path()), sim.clone())
        .await
        .unwrap();

    let mut groups = Vec::new();
    for _ in 0..6 {
        groups.push(
            w.new_container(ContainerSpec::image("alpine").started().replicas(3))
                .await,
        );
    }
    for group in &groups {
        group.exec(["echo", "hi"], 0).await.unwrap();
    }
    w.destroy().await;

    let export = w.timeline().snapshot().unwrap();
    let ids: Vec<u64> = export.events.iter().map(|e| e.id).collect();
    assert_eq!(ids, (0..ids.len() as u64).collect::<Vec<_>>());
    // create + 18 adds + 6 awaits + 18 execs + 18 logs + destroy
    assert_eq!(ids.len(), 62);
    assert_eq!(export.running().count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_creation_runs_concurrently() {
    let sim = SimProvider::shared(latency(200));
    let mut w = world("Parallel", &sim).await;

    let started = Instant::now();
    let replicated = w.new_container(ContainerSpec::image("alpine").replicas(3)).await;
    let single = w.new_container(ContainerSpec::image("caddy")).await;

    // Neither call waited for a creation.
    assert!(started.elapsed() < Duration::from_millis(100));

    replicated.await_ready().await.unwrap();
    single.await_ready().await.unwrap();

    // Close to one creation, far from four.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);

    w.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destroy_waits_for_slow_failing_creation() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimProvider::shared(SimConfig::instant());
    sim.fail_create("Teardown-alpine-1", "no space left on device");
    sim.set_create_latency("Teardown-alpine-1", Duration::from_millis(300));

    let mut w = World::new(WorldConfig::new("Teardown").with_log_dir(dir.path()), sim.clone())
        .await
        .unwrap();
    let group = w.new_container(ContainerSpec::image("alpine").started()).await;
    assert!(!group.members()[0].is_resolved());

    let started = Instant::now();
    w.destroy().await;
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(group.members()[0].is_resolved());

    let log = std::fs::read_to_string(dir.path().join("log_Teardown_events.log")).unwrap();
    assert!(log.starts_with("Event Timeline (Total: "));
    assert!(log.contains("World: add alpine container Teardown-alpine-1"));
    assert!(log.contains("World: destroy"));
    assert!(log.contains("Event Logs:"));
    assert_eq!(sim.network_count(), 0);
}

#[tokio::test]
async fn test_readiness_check_runs_after_start() {
    let sim = SimProvider::shared(SimConfig::instant());
    let mut w = world("Probe", &sim).await;

    let ready = w
        .new_container(
            ContainerSpec::image("alpine")
                .started()
                .waiting_for(ExecProbe::new(["true"]).with_poll_interval(Duration::from_millis(5))),
        )
        .await;
    ready.await_ready().await.unwrap();

    let never = w
        .new_container(
            ContainerSpec::image("alpine")
                .started()
                .waiting_for(
                    ExecProbe::new(["false"])
                        .with_poll_interval(Duration::from_millis(5))
                        .with_startup_timeout(Duration::from_millis(50)),
                ),
        )
        .await;
    let err = never.await_ready().await.unwrap_err();
    assert!(matches!(err, WorldError::Provision { .. }));

    w.destroy().await;
    // The timed-out container was removed by its provisioning task.
    assert_eq!(sim.stats().terminates, 2);
}

#[tokio::test]
async fn test_teardown_hook_can_use_group() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimProvider::shared(SimConfig::instant());
    let mut w = World::new(WorldConfig::new("Hook").with_log_dir(dir.path()), sim.clone())
        .await
        .unwrap();

    w.new_container(
        ContainerSpec::image("alpine")
            .started()
            .on_destroy(|group| async move {
                // Members are terminated by now.
                match group.exec(["true"], 0).await {
                    Err(WorldError::Exec { .. }) => Ok(()),
                    other => other,
                }
            }),
    )
    .await;
    w.destroy().await;

    let log = std::fs::read_to_string(dir.path().join("log_Hook_events.log")).unwrap();
    assert!(log.contains("Hook-alpine-1: exec true"));
}

#[tokio::test]
async fn test_failing_terminate_does_not_stop_teardown() {
    let sim = SimProvider::shared(SimConfig::instant());
    sim.fail_terminate("Stuck-alpine-1-1", "device or resource busy");
    let mut w = world("Stuck", &sim).await;

    w.new_container(ContainerSpec::image("alpine").started().replicas(2))
        .await;
    w.destroy().await;

    assert!(w.is_destroyed());
    assert_eq!(sim.terminated(), vec!["Stuck-alpine-1-2".to_string()]);
    assert_eq!(sim.live_containers(), vec!["Stuck-alpine-1-1".to_string()]);
    // Still has an endpoint, so removal fails and is only logged.
    assert_eq!(sim.network_count(), 1);
}
