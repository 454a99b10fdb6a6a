//! Error types for the relay pipeline.
//!
//! Nothing here is fatal to the process. Bootstrap code uses `anyhow`
//! instead, since its failures are only ever reported and exited on.

/// Failures that can occur while moving an event through the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A remote call to the platform failed or returned a non-ok envelope.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound payload could not be decoded into an update.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The work queue was full and the event was dropped.
    #[error("work queue full, event {0} dropped")]
    Overload(i64),

    /// A non-admin sender tried to run a privileged command.
    #[error("user {0} is not allowed to run this command")]
    PermissionDenied(i64),

    /// A worker terminated unexpectedly while processing an event.
    #[error("worker fault: {0}")]
    WorkerFault(String),

    /// The user store rejected a read or write.
    #[error("store error: {0}")]
    Store(String),
}

impl From<teloxide::RequestError> for RelayError {
    fn from(err: teloxide::RequestError) -> Self {
        RelayError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}

impl From<rusqlite::Error> for RelayError {
    fn from(err: rusqlite::Error) -> Self {
        RelayError::Store(err.to_string())
    }
}
