//! World - the per-test namespace owning network, containers and timeline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use testworld_env::{
    await_ready, ContainerProvider, CreateRequest, NetworkOptions, NetworkRef, ProviderError,
    ReadinessProbe, TaskSpawner, TokioSpawner,
};
use tracing::{debug, error, info, warn};

use crate::error::WorldError;
use crate::group::{member_layout, ReplicaGroup};
use crate::slot::{pending, SlotResult, SlotWriter};
use crate::spec::ContainerSpec;
use crate::timeline::Timeline;

/// Grace period before a terminating container is killed.
///
/// Far below the usual 10s: a world tears down many containers and pays
/// this per container.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Environment variable naming the world log directory.
pub const LOG_DIR_ENV: &str = "TESTWORLD_LOG_DIR";

/// Configuration for a world.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Namespace; prefixes every group name. Unique per test.
    pub name: String,

    /// Directory for the combined world log (None = no log)
    pub log_dir: Option<PathBuf>,

    /// Grace period used when terminating containers
    pub grace_period: Duration,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: "world".to_string(),
            log_dir: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl WorldConfig {
    /// Creates a config for the world `name` without a log.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Creates a config taking the log directory from `TESTWORLD_LOG_DIR`.
    pub fn from_env(name: impl Into<String>) -> Self {
        let config = Self::new(name);
        match std::env::var_os(LOG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => config.with_log_dir(dir),
            _ => config,
        }
    }

    /// Sets the log directory.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Sets the termination grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// State shared between the world, its groups and provisioning tasks.
pub(crate) struct WorldShared {
    pub(crate) name: String,
    pub(crate) provider: Arc<dyn ContainerProvider>,
    pub(crate) timeline: Timeline,
    pub(crate) network: NetworkRef,
}

/// The environment a test runs in.
///
/// Containers added to the world share one network and one timeline. Call
/// [`destroy`](World::destroy) at the end of the test.
pub struct World {
    shared: Arc<WorldShared>,
    spawner: Arc<dyn TaskSpawner>,
    grace_period: Duration,

    /// Every group ever created, registered before provisioning starts
    groups: HashMap<String, ReplicaGroup>,

    /// Per-kind sequence numbers for group names
    kinds: HashMap<String, usize>,

    destroyed: bool,
}

impl World {
    /// Creates a world whose containers are provisioned on Tokio tasks.
    pub async fn new(config: WorldConfig, provider: Arc<dyn ContainerProvider>) -> Result<Self, WorldError> {
        Self::with_spawner(config, provider, TokioSpawner::shared()).await
    }

    /// Creates a world with a custom task spawner.
    pub async fn with_spawner(
        config: WorldConfig,
        provider: Arc<dyn ContainerProvider>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Result<Self, WorldError> {
        // The timeline comes first so network creation is timed too.
        let timeline = match &config.log_dir {
            Some(dir) => Timeline::new(&config.name, dir).unwrap_or_else(|e| {
                warn!("Failed to create world log: {}", e);
                Timeline::disabled()
            }),
            None => Timeline::disabled(),
        };

        let event = timeline.new_event("World: create");
        let network = provider.create_network(&NetworkOptions::bridge()).await;
        event.finish();

        let network = match network {
            Ok(network) => network,
            Err(source) => {
                let err = WorldError::Network {
                    world: config.name.clone(),
                    source,
                };
                error!("{}", err);
                // Nothing but the timeline exists yet; tear it down like
                // any other world so the log keeps its shape.
                timeline.new_event("World: destroy").finish();
                finalize_timeline(&timeline);
                return Err(err);
            }
        };

        info!(world = %config.name, network = %network.name, "World created");

        Ok(Self {
            shared: Arc::new(WorldShared {
                name: config.name,
                provider,
                timeline,
                network,
            }),
            spawner,
            grace_period: config.grace_period,
            groups: HashMap::new(),
            kinds: HashMap::new(),
            destroyed: false,
        })
    }

    /// World namespace.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Shared network.
    pub fn network(&self) -> &NetworkRef {
        &self.shared.network
    }

    /// Event timeline.
    pub fn timeline(&self) -> &Timeline {
        &self.shared.timeline
    }

    /// Looks up a group by name.
    pub fn group(&self, name: &str) -> Option<&ReplicaGroup> {
        self.groups.get(name)
    }

    /// All registered groups, in no particular order.
    pub fn groups(&self) -> impl Iterator<Item = &ReplicaGroup> {
        self.groups.values()
    }

    /// Number of groups created for `kind`.
    pub fn kind_count(&self, kind: &str) -> usize {
        self.kinds.get(kind).copied().unwrap_or(0)
    }

    /// Returns true once `destroy` has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Adds a group of containers to the world.
    ///
    /// Returns as soon as the group is registered; each replica is created
    /// on its own background task and group operations wait for it. With
    /// `spec.awaited` the replicas are created one after another before
    /// this returns. Creation failures surface on first use of the group.
    pub async fn new_container(&mut self, spec: ContainerSpec) -> ReplicaGroup {
        let kind = spec.kind();
        let sequence = {
            let counter = self.kinds.entry(kind.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let name = format!("{}-{}-{}", self.shared.name, kind, sequence);

        let layout = member_layout(&name, spec.replica_count());
        let (writers, slots): (Vec<SlotWriter>, Vec<_>) =
            layout.iter().map(|(address, _)| pending(address.as_str())).unzip();

        let group = ReplicaGroup::new(
            Arc::clone(&self.shared),
            name.clone(),
            kind.clone(),
            slots,
            spec.waiting_for.clone(),
            spec.on_destroy.clone(),
        );
        self.groups.insert(name, group.clone());

        for ((address, aliases), writer) in layout.into_iter().zip(writers) {
            let request = spec.to_create_request(&address, &self.shared.network.name, aliases);
            let task = provision(
                Arc::clone(&self.shared),
                kind.clone(),
                request,
                spec.started,
                spec.waiting_for.clone(),
                self.grace_period,
                writer,
            );

            if spec.awaited {
                task.await;
            } else {
                self.spawner.spawn(&address, Box::pin(task));
            }
        }

        group
    }

    /// Tears the world down.
    ///
    /// Waits for every pending creation, collects each container's logs,
    /// terminates it, runs the group's teardown hook, removes the network
    /// and writes the world log. Individual failures are logged and never
    /// stop the teardown. Calling it again does nothing.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let shared = Arc::clone(&self.shared);
        let event = shared.timeline.new_event("World: destroy");

        for group in self.groups.values() {
            for slot in group.members() {
                let handle = match slot.resolve().await {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!("Container {} failed to create: {}", slot.name(), e);
                        continue;
                    }
                };

                if let Err(e) = group.collect_logs(slot.name(), &handle).await {
                    warn!("Failed to collect logs for container {}: {}", slot.name(), e);
                }

                if let Err(e) = shared.provider.terminate(&handle, self.grace_period).await {
                    warn!("Failed to terminate container {}: {}", slot.name(), e);
                }
            }

            if let Some(hook) = group.on_destroy() {
                if let Err(e) = hook(group.clone()).await {
                    warn!("Teardown hook for {} failed: {}", group.name(), e);
                }
            }
        }

        if let Err(e) = shared.provider.cleanup_network(&shared.network).await {
            warn!("Failed to remove network {}: {}", shared.network.name, e);
        }

        event.finish();
        finalize_timeline(&shared.timeline);
    }
}

impl Drop for World {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!(
                "World {} dropped without destroy(); {} group(s) may leak",
                self.shared.name,
                self.groups.len()
            );
        }
    }
}

fn finalize_timeline(timeline: &Timeline) {
    if let Err(e) = timeline.finalize() {
        warn!("Failed to write world log: {}", e);
    }
}

/// Body of one replica's provisioning task.
///
/// The event covers the task's real execution window and is finished
/// before the result is published.
async fn provision(
    shared: Arc<WorldShared>,
    kind: String,
    request: CreateRequest,
    started: bool,
    probe: Option<Arc<dyn ReadinessProbe>>,
    grace_period: Duration,
    writer: SlotWriter,
) {
    let event = shared
        .timeline
        .new_event(format!("World: add {} container {}", kind, request.name));

    let result = create_member(shared.provider.as_ref(), &request, started, probe.as_deref(), grace_period).await;
    if let Err(e) = &result {
        debug!("Container {} failed to create: {}", request.name, e);
    }

    event.finish();
    writer.publish(result);
}

async fn create_member(
    provider: &dyn ContainerProvider,
    request: &CreateRequest,
    started: bool,
    probe: Option<&dyn ReadinessProbe>,
    grace_period: Duration,
) -> SlotResult {
    let handle = provider.create(request).await?;
    if !started {
        return Ok(handle);
    }

    let ready = async {
        provider.start(&handle).await?;
        if let Some(probe) = probe {
            await_ready(probe, provider, &handle).await?;
        }
        Ok::<(), ProviderError>(())
    }
    .await;

    if let Err(err) = ready {
        // Nobody will ever get this handle; remove the container here.
        if let Err(e) = provider.terminate(&handle, grace_period).await {
            warn!("Failed to terminate container {}: {}", handle.name, e);
        }
        return Err(err);
    }
    Ok(handle)
}
