//! Replica groups - 1..N identical containers behind one name.
//!
//! Creation happens in the background; every group operation first waits
//! for all members to exist and then runs against each member in index
//! order, recording one timeline event per member.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use testworld_env::{
    await_ready, read_output, ContainerHandle, ContainerProvider, ProviderError, ReadinessProbe,
};
use tracing::{error, warn};

use crate::error::WorldError;
use crate::slot::PendingSlot;
use crate::spec::TeardownHook;
use crate::timeline::{Event, Timeline};
use crate::world::WorldShared;

/// Member addresses and network aliases for a group.
///
/// A single member is addressed by the group name itself. With more than
/// one, member `i` (1-indexed) is `{group}-{i}` and is registered under both
/// its own address and the group name, so the group name resolves to every
/// member at once.
pub fn member_layout(group: &str, replicas: usize) -> Vec<(String, Vec<String>)> {
    let replicas = replicas.max(1);
    if replicas == 1 {
        return vec![(group.to_string(), vec![group.to_string()])];
    }
    (1..=replicas)
        .map(|i| {
            let address = format!("{}-{}", group, i);
            let aliases = vec![address.clone(), group.to_string()];
            (address, aliases)
        })
        .collect()
}

/// Handle to a group of replicas in a world.
///
/// Cheap to clone; all clones share readiness state.
#[derive(Clone)]
pub struct ReplicaGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    name: String,
    kind: String,
    members: Vec<PendingSlot>,

    /// Set once an operation has forced every member to resolve
    ready: AtomicBool,

    /// Held by the caller recording the await event
    awaiting: AtomicBool,

    waiting_for: Option<Arc<dyn ReadinessProbe>>,
    on_destroy: Option<TeardownHook>,
    world: Arc<WorldShared>,
}

impl ReplicaGroup {
    pub(crate) fn new(
        world: Arc<WorldShared>,
        name: String,
        kind: String,
        members: Vec<PendingSlot>,
        waiting_for: Option<Arc<dyn ReadinessProbe>>,
        on_destroy: Option<TeardownHook>,
    ) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name,
                kind,
                members,
                ready: AtomicBool::new(false),
                awaiting: AtomicBool::new(false),
                waiting_for,
                on_destroy,
                world,
            }),
        }
    }

    /// Group name; resolves to every member on the world network.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Kind derived from the image.
    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    /// Number of members.
    pub fn replicas(&self) -> usize {
        self.inner.members.len()
    }

    /// Pending results, in member order.
    pub fn members(&self) -> &[PendingSlot] {
        &self.inner.members
    }

    /// Unique member addresses, in member order.
    pub fn member_names(&self) -> Vec<&str> {
        self.inner.members.iter().map(PendingSlot::name).collect()
    }

    /// Returns true once an operation has waited for every member.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub(crate) fn on_destroy(&self) -> Option<&TeardownHook> {
        self.inner.on_destroy.as_ref()
    }

    fn timeline(&self) -> &Timeline {
        &self.inner.world.timeline
    }

    fn provider(&self) -> &dyn ContainerProvider {
        self.inner.world.provider.as_ref()
    }

    /// Waits for every member in order and returns their handles.
    ///
    /// Stops at the first failed member without waiting for later ones.
    pub async fn handles(&self) -> Result<Vec<ContainerHandle>, WorldError> {
        let mut handles = Vec::with_capacity(self.inner.members.len());
        for slot in &self.inner.members {
            let handle = slot.resolve().await.map_err(|source| WorldError::Provision {
                group: self.inner.name.clone(),
                member: slot.name().to_string(),
                source,
            })?;
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Blocks until every member has been created (and started, if the
    /// container spec asked for it).
    pub async fn await_ready(&self) -> Result<(), WorldError> {
        self.ensure_ready().await.map(|_| ())
    }

    /// Like [`handles`](Self::handles), but records an await event the
    /// first time the group is forced and logs failures.
    ///
    /// Concurrent callers on clones record a single event between them.
    async fn ensure_ready(&self) -> Result<Vec<ContainerHandle>, WorldError> {
        let claimed = !self.is_ready() && !self.inner.awaiting.swap(true, Ordering::SeqCst);
        let event = if claimed {
            self.timeline().new_event(format!("{}: await", self.inner.name))
        } else {
            Event::inert()
        };

        let result = self.handles().await;
        event.finish();

        match result {
            Ok(handles) => {
                self.inner.ready.store(true, Ordering::SeqCst);
                Ok(handles)
            }
            Err(err) => {
                // A later attempt records its own await.
                if claimed {
                    self.inner.awaiting.store(false, Ordering::SeqCst);
                }
                Err(fail(err))
            }
        }
    }

    /// Member names paired with handles.
    async fn ready_members(&self) -> Result<Vec<(String, ContainerHandle)>, WorldError> {
        let handles = self.ensure_ready().await?;
        Ok(self
            .inner
            .members
            .iter()
            .map(|slot| slot.name().to_string())
            .zip(handles)
            .collect())
    }

    /// Starts every member, then runs the group's readiness probe on it.
    ///
    /// For groups created without `started`.
    pub async fn start(&self) -> Result<(), WorldError> {
        for (member, handle) in self.ready_members().await? {
            let event = self.timeline().new_event(format!("{}: start", member));

            if let Err(source) = self.provider().start(&handle).await {
                return Err(fail(WorldError::Start { member, source }));
            }
            if let Some(probe) = &self.inner.waiting_for {
                if let Err(source) = await_ready(probe.as_ref(), self.provider(), &handle).await {
                    return Err(fail(WorldError::Wait { member, source }));
                }
            }

            event.finish();
        }
        Ok(())
    }

    /// Runs `cmd` in every member and checks its exit code.
    ///
    /// Output goes to the member's event log. The first failing member
    /// aborts the operation.
    pub async fn exec<I, S>(&self, cmd: I, expected_code: i64) -> Result<(), WorldError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cmd: Vec<String> = cmd.into_iter().map(Into::into).collect();

        for (member, handle) in self.ready_members().await? {
            let event = self
                .timeline()
                .new_event(format!("{}: exec {}", member, cmd.join(" ")));

            let result = match self.provider().exec(&handle, &cmd).await {
                Ok(result) => result,
                Err(source) => return Err(fail(WorldError::Exec { member, source })),
            };
            match read_output(result.output).await {
                Ok(output) => event.write(&output),
                Err(e) => warn!("Failed to read exec output of {}: {}", member, e),
            }

            // A failed step is left unfinished and shows as running.
            if result.exit_code != expected_code {
                return Err(fail(WorldError::ExitCode {
                    member,
                    cmd,
                    actual: result.exit_code,
                    expected: expected_code,
                }));
            }

            event.finish();
        }
        Ok(())
    }

    /// Waits until `probe` passes on every member.
    pub async fn wait(&self, probe: &dyn ReadinessProbe) -> Result<(), WorldError> {
        for (member, handle) in self.ready_members().await? {
            let event = self.timeline().new_event(format!("{}: wait", member));

            if let Err(source) = await_ready(probe, self.provider(), &handle).await {
                return Err(fail(WorldError::Wait { member, source }));
            }

            event.finish();
        }
        Ok(())
    }

    /// Copies `path` out of every member into the timeline.
    pub async fn log_file(&self, path: &str) -> Result<(), WorldError> {
        for (member, handle) in self.ready_members().await? {
            let event = self
                .timeline()
                .new_event(format!("{}: log file {}", member, path));

            let content = match self.provider().copy_file_out(&handle, path).await {
                Ok(stream) => read_output(stream).await,
                Err(e) => Err(e),
            };
            match content {
                Ok(bytes) => event.write(&bytes),
                Err(source) => {
                    return Err(fail(WorldError::CopyFile {
                        member,
                        path: path.to_string(),
                        source,
                    }))
                }
            }

            event.finish();
        }
        Ok(())
    }

    /// Writes one member's container logs into the timeline.
    pub(crate) async fn collect_logs(&self, member: &str, handle: &ContainerHandle) -> Result<(), ProviderError> {
        let event = self.timeline().new_event(format!("{}: logs", member));

        let result = match self.provider().logs(handle).await {
            Ok(stream) => read_output(stream).await.map(|bytes| event.write(&bytes)),
            Err(e) => Err(e),
        };

        event.finish();
        result
    }
}

impl std::fmt::Debug for ReplicaGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaGroup")
            .field("name", &self.inner.name)
            .field("members", &self.member_names())
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Logs a fatal error and hands it back.
fn fail(err: WorldError) -> WorldError {
    error!("{}", err);
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_member_uses_group_name() {
        let layout = member_layout("t-alpine-1", 1);
        assert_eq!(layout, vec![("t-alpine-1".to_string(), vec!["t-alpine-1".to_string()])]);
    }

    #[test]
    fn test_zero_replicas_means_one() {
        assert_eq!(member_layout("t-alpine-1", 0).len(), 1);
    }

    #[test]
    fn test_replicas_share_group_alias() {
        let layout = member_layout("t-caddy-2", 3);

        let addresses: Vec<&str> = layout.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(addresses, vec!["t-caddy-2-1", "t-caddy-2-2", "t-caddy-2-3"]);

        for (address, aliases) in &layout {
            assert_eq!(aliases, &vec![address.clone(), "t-caddy-2".to_string()]);
        }
    }
}
