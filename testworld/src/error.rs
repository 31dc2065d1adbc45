//! Errors that fail a test.

use testworld_env::ProviderError;
use thiserror::Error;

/// A failure the calling test cannot continue past.
///
/// Every variant names the world, group or member it concerns. Teardown
/// problems are never reported through this type; they are logged.
#[derive(Debug, Clone, Error)]
pub enum WorldError {
    /// The shared network could not be created
    #[error("Failed to create network for world {world}: {source}")]
    Network {
        world: String,
        #[source]
        source: ProviderError,
    },

    /// A member failed to provision
    #[error("Container {group} failed to create: {member}: {source}")]
    Provision {
        group: String,
        member: String,
        #[source]
        source: ProviderError,
    },

    /// A member failed to start
    #[error("Failed to start container {member}: {source}")]
    Start {
        member: String,
        #[source]
        source: ProviderError,
    },

    /// A command could not be run
    #[error("Failed to exec in container {member}: {source}")]
    Exec {
        member: String,
        #[source]
        source: ProviderError,
    },

    /// A command ran but exited with the wrong code
    #[error("Command {cmd:?} exited with code {actual} (expected {expected}) in container {member}")]
    ExitCode {
        member: String,
        cmd: Vec<String>,
        actual: i64,
        expected: i64,
    },

    /// A readiness probe failed or timed out
    #[error("Wait failed for container {member}: {source}")]
    Wait {
        member: String,
        #[source]
        source: ProviderError,
    },

    /// A file could not be copied out of a member
    #[error("Failed to copy file {path} from container {member}: {source}")]
    CopyFile {
        member: String,
        path: String,
        #[source]
        source: ProviderError,
    },
}

impl WorldError {
    /// The member the failure concerns, if it concerns one.
    pub fn member(&self) -> Option<&str> {
        match self {
            WorldError::Network { .. } => None,
            WorldError::Provision { member, .. }
            | WorldError::Start { member, .. }
            | WorldError::Exec { member, .. }
            | WorldError::ExitCode { member, .. }
            | WorldError::Wait { member, .. }
            | WorldError::CopyFile { member, .. } => Some(member),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_message_names_member_and_command() {
        let err = WorldError::ExitCode {
            member: "t-alpine-1-2".to_string(),
            cmd: vec!["false".to_string()],
            actual: 1,
            expected: 0,
        };
        assert_eq!(
            err.to_string(),
            "Command [\"false\"] exited with code 1 (expected 0) in container t-alpine-1-2"
        );
        assert_eq!(err.member(), Some("t-alpine-1-2"));
    }

    #[test]
    fn test_provision_message_names_group_and_member() {
        let err = WorldError::Provision {
            group: "t-alpine-1".to_string(),
            member: "t-alpine-1-3".to_string(),
            source: ProviderError::create("pull access denied"),
        };
        assert_eq!(
            err.to_string(),
            "Container t-alpine-1 failed to create: t-alpine-1-3: create failed: pull access denied"
        );
    }
}
