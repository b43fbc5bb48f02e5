//! Error types for the snapkeep agent.

use snapkeep_core::CoreError;
use thiserror::Error;

/// Errors raised by configuration loading, command execution and cycles.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration file could not be read, parsed or validated.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Spawning or talking to an external command failed.
    #[error("Runner error: {command}: {reason}")]
    Runner {
        /// Program that was run.
        command: String,
        /// What went wrong.
        reason: String,
    },

    /// A cycle refused to continue.
    #[error("Cycle aborted: {0}")]
    Aborted(String),

    /// Structural or schema error from the core model.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use snapkeep_core::PropertyName;

    #[test]
    fn test_runner_error_display() {
        let err = AgentError::Runner {
            command: "/usr/sbin/zfs".into(),
            reason: "not found".into(),
        };
        assert_eq!(err.to_string(), "Runner error: /usr/sbin/zfs: not found");
    }

    #[test]
    fn test_core_error_is_transparent() {
        let core = CoreError::SchemaIntegrity {
            object: "tank".into(),
            property: PropertyName::Enabled,
        };
        let message = core.to_string();
        let err: AgentError = core.into();
        assert_eq!(err.to_string(), message);
    }
}
