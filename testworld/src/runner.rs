//! Scenario runner - drives worlds against the simulated provider.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::WorldError;
use crate::exporter::TimelineExport;
use crate::scenarios::ScenarioId;
use crate::sim::{SimConfig, SimProvider, SimStats};
use crate::spec::ContainerSpec;
use crate::world::{World, WorldConfig};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Wall time for the whole run, teardown included
    pub elapsed_secs: f64,

    /// Events recorded on the world's timeline
    pub event_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Provider calls made during the run
    pub stats: SimStats,

    /// Recorded timeline
    pub timeline: Option<TimelineExport>,
}

/// Runs world scenarios.
pub struct ScenarioRunner {
    /// Seed for the simulator
    seed: u64,

    /// Where world logs go; a scratch directory if unset
    log_dir: Option<PathBuf>,

    /// Simulated create latency
    latency: Duration,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            log_dir: None,
            latency: Duration::from_millis(100),
        }
    }

    /// Keeps world logs in `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Sets the simulated create latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let started = Instant::now();

        let sim = SimProvider::shared(
            SimConfig::default()
                .with_seed(self.seed)
                .with_latency(self.latency, self.latency / 4),
        );

        // Without a log dir the world still logs, into a directory removed
        // when the run ends.
        let scratch;
        let log_dir = match &self.log_dir {
            Some(dir) => dir.clone(),
            None => match tempfile::tempdir() {
                Ok(dir) => {
                    scratch = dir;
                    scratch.path().to_path_buf()
                }
                Err(e) => {
                    return self.result(scenario, started, Err(format!("no scratch dir: {}", e)), None, &sim)
                }
            },
        };

        let name = format!("{}-{}", scenario.name().replace('_', "-"), self.seed);
        let config = WorldConfig::new(name).with_log_dir(log_dir);
        let mut world = match World::new(config, sim.clone()).await {
            Ok(world) => world,
            Err(e) => return self.result(scenario, started, Err(e.to_string()), None, &sim),
        };

        let outcome = match scenario {
            ScenarioId::ParallelBoot => self.run_parallel_boot(&mut world).await,
            ScenarioId::ReplicaDns => self.run_replica_dns(&mut world, &sim).await,
            ScenarioId::LazyFailure => self.run_lazy_failure(&mut world, &sim).await,
            ScenarioId::SlowTeardown => self.run_slow_teardown(&mut world, &sim).await,
        };

        // No-op if the scenario already tore the world down.
        world.destroy().await;
        let outcome = outcome.and_then(|()| check_clean(&sim));
        let timeline = world.timeline().snapshot();

        self.result(scenario, started, outcome, timeline, &sim)
    }

    fn result(
        &self,
        scenario: ScenarioId,
        started: Instant,
        outcome: Result<(), String>,
        timeline: Option<TimelineExport>,
        sim: &SimProvider,
    ) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: outcome.is_ok(),
            elapsed_secs: started.elapsed().as_secs_f64(),
            event_count: timeline.as_ref().map_or(0, |t| t.events.len()),
            failure_reason: outcome.err(),
            stats: sim.stats(),
            timeline,
        }
    }

    /// TW-001: ParallelBoot - many groups provisioned in the background.
    ///
    /// **Assertion**: 8 groups are ready in well under 8x one creation.
    async fn run_parallel_boot(&self, world: &mut World) -> Result<(), String> {
        info!("TW-001: ParallelBoot - 8 groups at once");
        let t = Instant::now();

        let mut groups = Vec::new();
        for _ in 0..8 {
            groups.push(world.new_container(ContainerSpec::image("alpine:latest").started()).await);
        }
        for group in &groups {
            group.await_ready().await.map_err(describe)?;
        }

        let elapsed = t.elapsed();
        debug!("8 groups ready after {:?}", elapsed);
        if elapsed >= self.latency * 4 {
            return Err(format!(
                "8 groups took {:.3}s; creation does not overlap ({:.3}s each)",
                elapsed.as_secs_f64(),
                self.latency.as_secs_f64()
            ));
        }
        Ok(())
    }

    /// TW-002: ReplicaDns - the group name resolves to every replica.
    ///
    /// **Assertion**: 3 addresses registered; nslookup and ping succeed.
    async fn run_replica_dns(&self, world: &mut World, sim: &SimProvider) -> Result<(), String> {
        info!("TW-002: ReplicaDns - 3 replicas behind one name");

        let servers = world
            .new_container(ContainerSpec::image("caddy").started().replicas(3))
            .await;
        let client = world
            .new_container(ContainerSpec::image("alpine").started())
            .await;

        servers.await_ready().await.map_err(describe)?;
        client.exec(["nslookup", servers.name()], 0).await.map_err(describe)?;
        for member in servers.member_names() {
            client.exec(["ping", "-c", "1", member], 0).await.map_err(describe)?;
        }

        let addresses = sim.lookup(&world.network().name, servers.name());
        if addresses.len() != 3 {
            return Err(format!("{} resolves to {:?}, expected 3 addresses", servers.name(), addresses));
        }
        Ok(())
    }

    /// TW-003: LazyFailure - a failed replica is reported on first use.
    ///
    /// **Assertion**: await_ready names replica 2 and returns long before
    /// the slow replica 3 would have finished.
    async fn run_lazy_failure(&self, world: &mut World, sim: &SimProvider) -> Result<(), String> {
        info!("TW-003: LazyFailure - replica 2 of 3 fails");

        let group_name = format!("{}-alpine-1", world.name());
        let broken = format!("{}-2", group_name);
        let slow_latency = self.latency * 20;
        sim.fail_create(&broken, "pull access denied");
        sim.set_create_latency(format!("{}-3", group_name), slow_latency);

        let t = Instant::now();
        let group = world
            .new_container(ContainerSpec::image("alpine").started().replicas(3))
            .await;

        match group.await_ready().await {
            Ok(()) => Err("await_ready succeeded despite a failed replica".to_string()),
            Err(e) if e.member() != Some(broken.as_str()) => {
                Err(format!("failure names {:?}, expected {}", e.member(), broken))
            }
            Err(_) if t.elapsed() >= slow_latency => {
                Err(format!("failure reported after {:.3}s; waited on the slow replica", t.elapsed().as_secs_f64()))
            }
            Err(e) => {
                debug!("Expected failure: {}", e);
                Ok(())
            }
        }
    }

    /// TW-004: SlowTeardown - destroy while a creation is still running.
    ///
    /// **Assertion**: destroy waits for the creation, survives its failure
    /// and writes the combined log.
    async fn run_slow_teardown(&self, world: &mut World, sim: &SimProvider) -> Result<(), String> {
        info!("TW-004: SlowTeardown - destroy during a failing creation");

        let member = format!("{}-alpine-1", world.name());
        let slow_latency = self.latency * 5;
        sim.fail_create(&member, "no space left on device");
        sim.set_create_latency(&member, slow_latency);

        let t = Instant::now();
        world.new_container(ContainerSpec::image("alpine").started()).await;
        world.destroy().await;
        let elapsed = t.elapsed();

        if elapsed < slow_latency {
            return Err(format!(
                "destroy returned after {:.3}s, before the creation finished",
                elapsed.as_secs_f64()
            ));
        }

        let Some(path) = world.timeline().log_path() else {
            return Err("world log disabled".to_string());
        };
        let log = std::fs::read_to_string(path).map_err(|e| format!("world log unreadable: {}", e))?;
        let add_event = format!("World: add alpine container {}", member);
        for needle in ["Event Timeline", "World: destroy", add_event.as_str()] {
            if !log.contains(needle) {
                return Err(format!("world log is missing {:?}", needle));
            }
        }
        Ok(())
    }
}

fn describe(err: WorldError) -> String {
    err.to_string()
}

/// Fails if the world left anything behind in the provider.
fn check_clean(sim: &Arc<SimProvider>) -> Result<(), String> {
    let leaked = sim.live_containers();
    if !leaked.is_empty() {
        warn!("Leaked containers: {:?}", leaked);
        return Err(format!("{} container(s) not terminated: {:?}", leaked.len(), leaked));
    }
    if sim.network_count() != 0 {
        return Err(format!("{} network(s) not removed", sim.network_count()));
    }
    Ok(())
}
