//! Error taxonomy for the wizdiff core (see spec §7).

/// Errors raised by the patch-discovery client, manifest parser, and
/// archive journal parser, and propagated up through the diff pass.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed manifest, archive header, or directory-protocol response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// HTTP non-200, connection failure, or gzip failure.
    #[error("transient network error: {0}")]
    Transient(String),

    /// An attempt to persist a row violating an invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// An internal sequencing failure (value before template, a
    /// non-empty deleted/changed list on a newly created archive,
    /// a missing `old_revision` when change detection is requested).
    #[error("state error: {0}")]
    State(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        CoreError::Protocol(msg.into())
    }
    pub fn transient(msg: impl Into<String>) -> Self {
        CoreError::Transient(msg.into())
    }
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }
    pub fn state(msg: impl Into<String>) -> Self {
        CoreError::State(msg.into())
    }
}
