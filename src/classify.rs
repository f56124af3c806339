use chrono::{DateTime, TimeZone};
use std::fmt;

use crate::error::{Error, ErrorKind};

/// Substrings the backend uses when the media host refuses a download
const SOURCE_UNAVAILABLE_PATTERNS: &[&str] = &[
    "YouTube",
    "HTTP Error 400",
    "HTTP Error 403",
    "Forbidden",
    "Precondition check failed",
];

/// Classified view of an error, ready to show to a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub kind: ErrorKind,
    pub remediation: String,
    /// Original error text, kept for diagnostics
    pub detail: String,
}

impl Diagnosis {
    /// Cancellation is reported neutrally, never as a failure
    pub fn is_silent(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// User-facing block headed by the time of the failure
    pub fn render<Tz>(&self, now: DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        format!("Operation failed [{}]\n{}", now.format("%H:%M:%S"), self.remediation)
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Whether a backend message says the media host blocked retrieval
pub fn is_source_unavailable(message: &str) -> bool {
    SOURCE_UNAVAILABLE_PATTERNS.iter().any(|p| message.contains(p))
}

/// Map an error to its stable kind and a remediation hint.
///
/// The structural kind from [`Error::kind`] is authoritative. Only remote,
/// protocol and job-failure messages are inspected for the source-unavailable
/// patterns.
pub fn classify(error: &Error) -> Diagnosis {
    let detail = error.to_string();

    let pattern_text = match error {
        Error::Remote { body, .. } => Some(body.as_str()),
        Error::Protocol(message) => Some(message.as_str()),
        Error::JobFailed { message, .. } => Some(message.as_str()),
        _ => None,
    };
    let kind = match pattern_text {
        Some(text) if is_source_unavailable(text) => ErrorKind::SourceUnavailable,
        _ => error.kind(),
    };

    let remediation = match (kind, error) {
        (ErrorKind::Configuration, _) => {
            "No API key is configured. Set SUBTITLE_HELPER_API_KEY or pass --api-key.".to_string()
        }
        (ErrorKind::Timeout, Error::Timeout { job_id, attempts }) => format!(
            "Polling timed out: job {job_id} did not finish after {attempts} attempts\n\n\
             Possible causes:\n\
             1. The server is under heavy load\n\
             2. The media is too long or in an unsupported format\n\
             Try again with a shorter video."
        ),
        (ErrorKind::Network, _) => {
            "Could not reach the service. Check your network connection and the endpoint.".to_string()
        }
        (ErrorKind::Cancelled, _) => "The job was cancelled. No result was produced.".to_string(),
        (ErrorKind::SourceUnavailable, _) => "The transcription server could not download this video.\n\
             Possible causes:\n\
             1. The video is restricted or requires signing in\n\
             2. The video is not available in the server's region\n\
             3. The host detected an automated download and blocked it\n\
             4. The server's network is blocked by the host\n\n\
             Suggestions:\n\
             - Use a different link\n\
             - Use a shorter clip\n\
             - Upload a local audio file instead"
            .to_string(),
        (ErrorKind::Busy, _) => {
            "A job is already running. Wait for it to finish or cancel it first.".to_string()
        }
        _ => format!("Details: {detail}"),
    };

    Diagnosis { kind, remediation, detail }
}
