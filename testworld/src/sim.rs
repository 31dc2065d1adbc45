//! Simulated container provider with fault injection.
//!
//! Containers live in memory. Each network keeps an alias table so
//! name-based discovery (`nslookup`, `ping`) behaves like a bridge
//! network's embedded DNS. A handful of builtin commands run inside the
//! simulated containers:
//!
//! | command            | behaviour                                   |
//! |--------------------|---------------------------------------------|
//! | `true` / `false`   | exit 0 / exit 1                             |
//! | `exit N`           | exit N                                      |
//! | `echo ARGS..`      | prints its arguments                        |
//! | `cat PATH`         | prints a file copied in at creation         |
//! | `nslookup NAME`    | prints every address registered for NAME    |
//! | `ping [..] NAME`   | exit 0 if NAME resolves                     |
//! | `sleep N`          | exit 0 immediately                          |
//!
//! Anything else exits 127.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use testworld_env::{
    output_from_bytes, ContainerHandle, ContainerId, ContainerProvider, CreateRequest, ExecResult,
    NetworkOptions, NetworkRef, OutputStream, ProviderError,
};
use tracing::debug;
use uuid::Uuid;

use crate::timeline::lock;

/// Simulator timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Seed for latency jitter and container ids
    pub seed: u64,

    /// Time every create takes
    pub base_latency: Duration,

    /// Upper bound of the random extra time added to each create
    pub jitter: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            base_latency: Duration::from_millis(20),
            jitter: Duration::from_millis(10),
        }
    }
}

impl SimConfig {
    /// No latency at all.
    pub fn instant() -> Self {
        Self {
            seed: 0,
            base_latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets base latency and jitter.
    pub fn with_latency(mut self, base_latency: Duration, jitter: Duration) -> Self {
        self.base_latency = base_latency;
        self.jitter = jitter;
        self
    }
}

/// Provider call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub networks_created: u64,
    pub networks_removed: u64,
    pub creates: u64,
    pub starts: u64,
    pub execs: u64,
    pub terminates: u64,
}

/// Faults keyed by container name.
#[derive(Default)]
struct Faults {
    network: Option<String>,
    create: HashMap<String, String>,
    start: HashMap<String, String>,
    terminate: HashMap<String, String>,
    create_latency: HashMap<String, Duration>,
}

struct SimContainer {
    handle: ContainerHandle,
    address: String,
    cmd: Vec<String>,
    files: BTreeMap<String, Vec<u8>>,
    running: bool,
    log: Vec<u8>,
}

struct SimNetwork {
    index: u64,
    next_host: u64,

    /// Alias -> addresses, in registration order
    aliases: BTreeMap<String, Vec<String>>,
}

struct SimState {
    rng: ChaCha8Rng,
    next_id: u64,
    next_network: u64,
    networks: HashMap<String, SimNetwork>,
    containers: HashMap<ContainerId, SimContainer>,
    faults: Faults,
    terminated: Vec<String>,
    stats: SimStats,
}

/// In-memory [`ContainerProvider`].
pub struct SimProvider {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl SimProvider {
    /// Creates a simulator.
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState {
                rng: ChaCha8Rng::seed_from_u64(config.seed),
                next_id: 0,
                next_network: 0,
                networks: HashMap::new(),
                containers: HashMap::new(),
                faults: Faults::default(),
                terminated: Vec::new(),
                stats: SimStats::default(),
            }),
        }
    }

    /// Creates a simulator behind an `Arc`, ready to hand to a world.
    pub fn shared(config: SimConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Timing configuration.
    pub fn config(&self) -> SimConfig {
        self.config
    }

    /// Makes every following `create_network` fail.
    pub fn fail_network(&self, msg: impl Into<String>) {
        lock(&self.state).faults.network = Some(msg.into());
    }

    /// Makes creating container `name` fail (after its latency).
    pub fn fail_create(&self, name: impl Into<String>, msg: impl Into<String>) {
        lock(&self.state).faults.create.insert(name.into(), msg.into());
    }

    /// Makes starting container `name` fail.
    pub fn fail_start(&self, name: impl Into<String>, msg: impl Into<String>) {
        lock(&self.state).faults.start.insert(name.into(), msg.into());
    }

    /// Makes terminating container `name` fail.
    pub fn fail_terminate(&self, name: impl Into<String>, msg: impl Into<String>) {
        lock(&self.state).faults.terminate.insert(name.into(), msg.into());
    }

    /// Adds extra create latency for container `name`.
    pub fn set_create_latency(&self, name: impl Into<String>, latency: Duration) {
        lock(&self.state).faults.create_latency.insert(name.into(), latency);
    }

    /// Clears all injected faults.
    pub fn heal_all(&self) {
        lock(&self.state).faults = Faults::default();
    }

    /// Addresses registered for `name` on `network`.
    pub fn lookup(&self, network: &str, name: &str) -> Vec<String> {
        let state = lock(&self.state);
        state
            .networks
            .get(network)
            .and_then(|net| net.aliases.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of networks currently present.
    pub fn network_count(&self) -> usize {
        lock(&self.state).networks.len()
    }

    /// Names of containers not yet terminated, sorted.
    pub fn live_containers(&self) -> Vec<String> {
        let state = lock(&self.state);
        let mut names: Vec<String> = state.containers.values().map(|c| c.handle.name.clone()).collect();
        names.sort();
        names
    }

    /// Names of terminated containers, in termination order.
    pub fn terminated(&self) -> Vec<String> {
        lock(&self.state).terminated.clone()
    }

    /// Call counts so far.
    pub fn stats(&self) -> SimStats {
        lock(&self.state).stats
    }

    fn create_delay(&self, name: &str) -> Duration {
        let mut state = lock(&self.state);
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(state.rng.gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        let extra = state.faults.create_latency.get(name).copied().unwrap_or_default();
        self.config.base_latency + jitter + extra
    }
}

impl Default for SimProvider {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimState {
    fn container(&self, handle: &ContainerHandle) -> Result<&SimContainer, ProviderError> {
        self.containers
            .get(&handle.id)
            .ok_or_else(|| ProviderError::not_found(format!("container {}", handle.name)))
    }

    fn container_mut(&mut self, handle: &ContainerHandle) -> Result<&mut SimContainer, ProviderError> {
        self.containers
            .get_mut(&handle.id)
            .ok_or_else(|| ProviderError::not_found(format!("container {}", handle.name)))
    }

    fn resolve(&self, network: &str, name: &str) -> &[String] {
        self.networks
            .get(network)
            .and_then(|net| net.aliases.get(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Runs a builtin command; returns exit code and output.
    fn run(&self, container: &SimContainer, cmd: &[String]) -> (i64, Vec<u8>) {
        let args: Vec<&str> = cmd.iter().map(String::as_str).collect();
        let network = container.handle.network.as_str();

        match args.as_slice() {
            ["true", ..] | ["sleep", ..] => (0, Vec::new()),
            ["false", ..] => (1, Vec::new()),
            ["exit"] => (0, Vec::new()),
            ["exit", code, ..] => match code.parse::<i64>() {
                Ok(code) => (code, Vec::new()),
                Err(_) => (2, format!("sh: exit: Illegal number: {}\n", code).into_bytes()),
            },
            ["echo", rest @ ..] => (0, format!("{}\n", rest.join(" ")).into_bytes()),
            ["cat", path] => match container.files.get(*path) {
                Some(contents) => (0, contents.clone()),
                None => (
                    1,
                    format!("cat: can't open '{}': No such file or directory\n", path).into_bytes(),
                ),
            },
            ["nslookup", name, ..] => {
                let addresses = self.resolve(network, name);
                if addresses.is_empty() {
                    return (1, format!("** server can't find {}: NXDOMAIN\n", name).into_bytes());
                }
                let mut out = format!("Server:\t\t127.0.0.11\nAddress:\t127.0.0.11:53\n\nName:\t{}\n", name);
                for address in addresses {
                    out.push_str(&format!("Address: {}\n", address));
                }
                (0, out.into_bytes())
            }
            ["ping", .., name] if !name.starts_with('-') => match self.resolve(network, name).first() {
                Some(address) => (
                    0,
                    format!("64 bytes from {}: seq=0 ttl=64 time=0.080 ms\n", address).into_bytes(),
                ),
                None => (1, format!("ping: bad address '{}'\n", name).into_bytes()),
            },
            [program, ..] => (127, format!("sh: {}: not found\n", program).into_bytes()),
            [] => (0, Vec::new()),
        }
    }
}

#[async_trait]
impl ContainerProvider for SimProvider {
    async fn create_network(&self, options: &NetworkOptions) -> Result<NetworkRef, ProviderError> {
        let mut state = lock(&self.state);
        if let Some(msg) = &state.faults.network {
            return Err(ProviderError::Network(msg.clone()));
        }

        state.next_network += 1;
        state.stats.networks_created += 1;
        let index = state.next_network;
        let network = NetworkRef {
            id: Uuid::from_bytes(state.rng.gen()).simple().to_string(),
            name: format!("testworld-net-{}", index),
        };
        state.networks.insert(
            network.name.clone(),
            SimNetwork {
                index,
                next_host: 2,
                aliases: BTreeMap::new(),
            },
        );

        debug!(network = %network.name, driver = %options.driver, "Created network");
        Ok(network)
    }

    async fn cleanup_network(&self, network: &NetworkRef) -> Result<(), ProviderError> {
        let mut state = lock(&self.state);
        let attached = state
            .containers
            .values()
            .filter(|c| c.handle.network == network.name)
            .count();
        if attached > 0 {
            return Err(ProviderError::Network(format!(
                "network {} has {} active endpoint(s)",
                network.name, attached
            )));
        }

        state
            .networks
            .remove(&network.name)
            .ok_or_else(|| ProviderError::not_found(format!("network {}", network.name)))?;
        state.stats.networks_removed += 1;
        debug!(network = %network.name, "Removed network");
        Ok(())
    }

    async fn create(&self, request: &CreateRequest) -> Result<ContainerHandle, ProviderError> {
        lock(&self.state).stats.creates += 1;

        let delay = self.create_delay(&request.name);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if let Some(msg) = state.faults.create.get(&request.name) {
            return Err(ProviderError::create(msg.clone()));
        }
        if request.image.is_empty() && request.build.is_none() {
            return Err(ProviderError::create("no image or build context given"));
        }

        let address = {
            let net = state
                .networks
                .get_mut(&request.network)
                .ok_or_else(|| ProviderError::not_found(format!("network {}", request.network)))?;
            let address = format!("10.{}.{}.{}", net.index % 256, net.next_host / 256, net.next_host % 256);
            net.next_host += 1;
            for alias in &request.aliases {
                net.aliases.entry(alias.clone()).or_default().push(address.clone());
            }
            address
        };

        state.next_id += 1;
        let id = ContainerId::from_seed(self.config.seed ^ state.next_id.rotate_left(32));
        let handle = ContainerHandle {
            id,
            name: request.name.clone(),
            network: request.network.clone(),
            aliases: request.aliases.clone(),
        };
        let files = request
            .files
            .iter()
            .map(|f| (f.container_path.clone(), f.contents.clone()))
            .collect();

        state.containers.insert(
            id,
            SimContainer {
                handle: handle.clone(),
                address: address.clone(),
                cmd: request.cmd.clone(),
                files,
                running: false,
                log: Vec::new(),
            },
        );

        debug!(container = %handle.name, %id, %address, "Created container");
        Ok(handle)
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), ProviderError> {
        let mut state = lock(&self.state);
        state.stats.starts += 1;
        if let Some(msg) = state.faults.start.get(&handle.name) {
            return Err(ProviderError::Start(msg.clone()));
        }

        let container = state.container(handle)?;
        if container.running {
            return Ok(());
        }
        let (code, output) = state.run(container, &container.cmd);

        let container = state.container_mut(handle)?;
        container.running = true;
        container.log.extend_from_slice(&output);
        if code != 0 {
            container.log.extend_from_slice(format!("[exited with code {}]\n", code).as_bytes());
        }

        debug!(container = %handle.name, "Started container");
        Ok(())
    }

    async fn exec(&self, handle: &ContainerHandle, cmd: &[String]) -> Result<ExecResult, ProviderError> {
        let mut state = lock(&self.state);
        state.stats.execs += 1;

        let container = state.container(handle)?;
        if !container.running {
            return Err(ProviderError::Exec(format!("container {} is not running", handle.name)));
        }
        if cmd.is_empty() {
            return Err(ProviderError::Exec("empty command".to_string()));
        }

        let (exit_code, output) = state.run(container, cmd);
        debug!(container = %handle.name, ?cmd, exit_code, "Exec");
        Ok(ExecResult {
            exit_code,
            output: output_from_bytes(output),
        })
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<OutputStream, ProviderError> {
        let state = lock(&self.state);
        let container = state.container(handle)?;
        Ok(output_from_bytes(container.log.clone()))
    }

    async fn copy_file_out(&self, handle: &ContainerHandle, path: &str) -> Result<OutputStream, ProviderError> {
        let state = lock(&self.state);
        let container = state.container(handle)?;
        match container.files.get(path) {
            Some(contents) => Ok(output_from_bytes(contents.clone())),
            None => Err(ProviderError::CopyFile(format!(
                "Could not find the file {} in container {}",
                path, handle.name
            ))),
        }
    }

    async fn terminate(&self, handle: &ContainerHandle, grace_period: Duration) -> Result<(), ProviderError> {
        let mut state = lock(&self.state);
        state.stats.terminates += 1;
        if let Some(msg) = state.faults.terminate.get(&handle.name) {
            return Err(ProviderError::Terminate(msg.clone()));
        }

        let container = state
            .containers
            .remove(&handle.id)
            .ok_or_else(|| ProviderError::not_found(format!("container {}", handle.name)))?;

        if let Some(net) = state.networks.get_mut(&container.handle.network) {
            for addresses in net.aliases.values_mut() {
                addresses.retain(|a| *a != container.address);
            }
            net.aliases.retain(|_, addresses| !addresses.is_empty());
        }
        state.terminated.push(handle.name.clone());

        debug!(container = %handle.name, ?grace_period, "Terminated container");
        Ok(())
    }
}
