//! Declarative container specification.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use testworld_env::{BoxFuture, BuildContext, ContainerFile, CreateRequest, ReadinessProbe};

use crate::error::WorldError;
use crate::group::ReplicaGroup;

/// Callback run once per group during world teardown.
///
/// Receives the group so it can use group operations itself.
pub type TeardownHook = Arc<dyn Fn(ReplicaGroup) -> BoxFuture<Result<(), WorldError>> + Send + Sync>;

/// Returns the last path component of an image reference, without tag.
///
/// `alpine:latest` -> `alpine`, `docker.io/library/nginx:1.19` -> `nginx`
pub fn basename(s: &str) -> &str {
    let s = match s.rfind('/') {
        Some(i) => &s[i + 1..],
        None => s,
    };
    match s.find(':') {
        Some(i) => &s[..i],
        None => s,
    }
}

/// What to create when adding containers to a world.
///
/// ```ignore
/// let spec = ContainerSpec::image("alpine:latest")
///     .cmd(["sleep", "30"])
///     .replicas(3)
///     .started();
/// ```
#[derive(Clone, Default)]
pub struct ContainerSpec {
    /// Image reference; ignored if `build` is set and this is empty
    pub image: String,

    /// Build the image from a context instead
    pub build: Option<BuildContext>,

    /// Start right after creation
    pub started: bool,

    /// Make `new_container` wait for creation instead of provisioning in the
    /// background
    pub awaited: bool,

    /// Number of identical containers; values below 1 mean 1
    pub replicas: usize,

    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,

    /// Ports to expose, e.g. `80` or `8080/tcp`
    pub exposed_ports: Vec<String>,

    /// Files copied in before the container starts
    pub files: Vec<ContainerFile>,

    /// tmpfs mounts (path -> options)
    pub tmpfs: BTreeMap<String, String>,

    /// Condition checked after start
    pub waiting_for: Option<Arc<dyn ReadinessProbe>>,

    /// Teardown callback
    pub on_destroy: Option<TeardownHook>,
}

impl ContainerSpec {
    /// Spec for an image reference.
    pub fn image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Spec for an image built from `context`.
    pub fn build(context: impl Into<String>) -> Self {
        Self {
            build: Some(BuildContext {
                context: context.into(),
                dockerfile: String::new(),
            }),
            ..Default::default()
        }
    }

    /// Starts the containers as part of creation.
    pub fn started(mut self) -> Self {
        self.started = true;
        self
    }

    /// Makes `new_container` block until creation has finished.
    pub fn awaited(mut self) -> Self {
        self.awaited = true;
        self
    }

    /// Sets the replica count.
    pub fn replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// Sets the entrypoint.
    pub fn entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = entrypoint.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the command.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Exposes a port.
    pub fn expose(mut self, port: impl Into<String>) -> Self {
        self.exposed_ports.push(port.into());
        self
    }

    /// Adds a file to copy in before start.
    pub fn file(mut self, file: ContainerFile) -> Self {
        self.files.push(file);
        self
    }

    /// Adds a tmpfs mount.
    pub fn tmpfs(mut self, path: impl Into<String>, options: impl Into<String>) -> Self {
        self.tmpfs.insert(path.into(), options.into());
        self
    }

    /// Sets the readiness probe run after start.
    pub fn waiting_for(mut self, probe: impl ReadinessProbe) -> Self {
        self.waiting_for = Some(Arc::new(probe));
        self
    }

    /// Sets the teardown callback.
    pub fn on_destroy<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ReplicaGroup) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorldError>> + Send + 'static,
    {
        let boxed: TeardownHook = Arc::new(
            move |group: ReplicaGroup| -> BoxFuture<Result<(), WorldError>> { Box::pin(hook(group)) },
        );
        self.on_destroy = Some(boxed);
        self
    }

    /// Kind used in group names: image basename, else build context
    /// basename, else `container`.
    pub fn kind(&self) -> String {
        let mut kind = basename(&self.image);
        if kind.is_empty() {
            kind = self.build.as_ref().map_or("", |b| basename(&b.context));
        }
        if kind.is_empty() {
            kind = "container";
        }
        kind.to_string()
    }

    /// Effective replica count.
    pub fn replica_count(&self) -> usize {
        self.replicas.max(1)
    }

    /// Provider request for one member.
    pub fn to_create_request(&self, name: &str, network: &str, aliases: Vec<String>) -> CreateRequest {
        CreateRequest {
            name: name.to_string(),
            image: self.image.clone(),
            build: self.build.clone(),
            network: network.to_string(),
            aliases,
            entrypoint: self.entrypoint.clone(),
            cmd: self.cmd.clone(),
            env: self.env.clone(),
            exposed_ports: self.exposed_ports.clone(),
            tmpfs: self.tmpfs.clone(),
            files: self.files.clone(),
        }
    }
}

impl std::fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSpec")
            .field("image", &self.image)
            .field("build", &self.build)
            .field("started", &self.started)
            .field("awaited", &self.awaited)
            .field("replicas", &self.replicas)
            .field("cmd", &self.cmd)
            .field("waiting_for", &self.waiting_for.is_some())
            .field("on_destroy", &self.on_destroy.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename() {
        assert_eq!(basename("alpine:latest"), "alpine");
        assert_eq!(basename("docker.io/library/nginx:1.19"), "nginx");
        assert_eq!(basename("caddy"), "caddy");
        assert_eq!(basename("registry:5000/team/app"), "app");
        assert_eq!(basename(""), "");
    }

    #[test]
    fn test_kind_fallbacks() {
        assert_eq!(ContainerSpec::image("alpine:3.19").kind(), "alpine");
        assert_eq!(ContainerSpec::build("./testdata/echo-server").kind(), "echo-server");
        assert_eq!(ContainerSpec::default().kind(), "container");
    }

    #[test]
    fn test_replica_count_minimum_is_one() {
        assert_eq!(ContainerSpec::image("alpine").replica_count(), 1);
        assert_eq!(ContainerSpec::image("alpine").replicas(0).replica_count(), 1);
        assert_eq!(ContainerSpec::image("alpine").replicas(3).replica_count(), 3);
    }

    #[test]
    fn test_create_request_carries_spec() {
        let spec = ContainerSpec::image("alpine:latest")
            .cmd(["sleep", "30"])
            .env("MODE", "test")
            .expose("80/tcp")
            .tmpfs("/scratch", "rw")
            .file(ContainerFile::new("/etc/motd", "hi"));

        let request = spec.to_create_request("w-alpine-1", "net-1", vec!["w-alpine-1".to_string()]);

        assert_eq!(request.name, "w-alpine-1");
        assert_eq!(request.network, "net-1");
        assert_eq!(request.cmd, vec!["sleep", "30"]);
        assert_eq!(request.env.get("MODE").map(String::as_str), Some("test"));
        assert_eq!(request.exposed_ports, vec!["80/tcp"]);
        assert_eq!(request.files.len(), 1);
    }
}
