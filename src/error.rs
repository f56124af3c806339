use std::fmt;

use thiserror::Error;

/// Errors that can occur while submitting, tracking or recording a job
#[derive(Error, Debug)]
pub enum Error {
    /// No bearer token is configured for the proxy
    #[error("API key is not configured")]
    MissingCredential,

    /// The request was rejected before reaching the network
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// The proxy answered with a non-success HTTP status
    #[error("Remote error (HTTP {status}): {body}")]
    Remote { status: u16, body: String },

    /// The response did not have the shape we expect
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The request never produced an HTTP response
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Polling used up its retry budget
    #[error("Polling timed out: job {job_id} did not finish after {attempts} attempts")]
    Timeout { job_id: String, attempts: u32 },

    /// The user asked to stop
    #[error("Job was cancelled")]
    Cancelled,

    /// The backend reported the job as failed
    #[error("Job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    /// The provider has nothing for the given reference
    #[error("Not found: {0}")]
    NotFound(String),

    /// A submit/poll cycle is already running
    #[error("Another transcription job is already in progress")]
    SessionActive,

    /// History database failure
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for subtitle-helper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error taxonomy shown to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    InvalidInput,
    Remote,
    Network,
    Protocol,
    Timeout,
    Cancelled,
    JobFailed,
    SourceUnavailable,
    NotFound,
    Busy,
    Storage,
}

impl Error {
    /// Structural kind of this error.
    ///
    /// This never returns [`ErrorKind::SourceUnavailable`]: that kind depends
    /// on message content and is decided by [`crate::classify::classify`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingCredential => ErrorKind::Configuration,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Remote { .. } => ErrorKind::Remote,
            Error::Protocol(_) | Error::Json(_) => ErrorKind::Protocol,
            Error::Transport(_) => ErrorKind::Network,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::JobFailed { .. } => ErrorKind::JobFailed,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::SessionActive => ErrorKind::Busy,
            Error::Storage(_) | Error::Serialization(_) | Error::Deserialization(_) => {
                ErrorKind::Storage
            }
        }
    }

    /// Whether this error means the user stopped the operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::InvalidInput => "InvalidInputError",
            ErrorKind::Remote => "RemoteError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Cancelled => "CancelledError",
            ErrorKind::JobFailed => "JobFailedError",
            ErrorKind::SourceUnavailable => "SourceUnavailableError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Busy => "BusyError",
            ErrorKind::Storage => "StorageError",
        };
        f.write_str(name)
    }
}
