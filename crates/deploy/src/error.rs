//! Error taxonomy surfaced by the orchestration engine.

use crate::context::Scope;

/// Errors returned by [`Orchestrator::run`](crate::Orchestrator::run).
///
/// Collaborators report failures as [`anyhow::Error`]; the engine wraps them into the
/// variant naming the step that failed.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The deploy backend rejected or could not complete provisioning a unit.
    #[error("failed to provision unit `{role}` ({kind})")]
    Provisioning {
        role: String,
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    /// A required artifact, ABI or function was not found in the active scope.
    #[error("failed to resolve `{kind}` in scope `{scope}`")]
    Resolution {
        kind: String,
        scope: Scope,
        #[source]
        source: anyhow::Error,
    },

    /// Argument values do not match the schema of the operation they target.
    #[error("invalid arguments for `{function}`: {reason}")]
    Encoding { function: String, reason: String },

    /// The aggregated configuration transaction was rejected or reverted.
    #[error("configuration phase `{phase}` failed to execute")]
    Execution {
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    /// A context was popped without a matching push, or left open.
    #[error("context stack imbalance: {reason}")]
    ScopeImbalance { reason: String },

    /// The pipeline declaration is inconsistent (unknown or duplicate roles).
    #[error("invalid pipeline: {reason}")]
    Pipeline { reason: String },

    /// The snapshot medium could not be read or written.
    #[error("snapshot `{key}` could not be accessed")]
    Snapshot {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

impl DeployError {
    pub(crate) fn encoding(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Encoding {
            function: function.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn pipeline(reason: impl Into<String>) -> Self {
        Self::Pipeline {
            reason: reason.into(),
        }
    }
}

/// Result alias used across the engine.
pub type Result<T, E = DeployError> = std::result::Result<T, E>;
