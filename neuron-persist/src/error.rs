//! Errors from persistence backends.

use thiserror::Error;

/// Errors surfaced by a [`crate::PersistenceStore`] implementation.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PersistError {
    /// No record exists for the given agent.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// A write or append operation failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// `appendEvent` detected a cursor gap or out-of-order write.
    #[error("event log consistency violation for {agent}: {detail}")]
    CursorViolation {
        /// The agent whose log is inconsistent.
        agent: String,
        /// What went wrong.
        detail: String,
    },

    /// `acquireAgentLock` failed because another holder's lease hasn't
    /// expired.
    #[error("agent lock held for {0}")]
    LockHeld(String),

    /// An optional capability (`querySessions`, `aggregateStats`, ...)
    /// this backend does not implement.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Catch-all for backend-specific errors (I/O, driver errors).
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
