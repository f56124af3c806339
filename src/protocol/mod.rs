use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::error::{Error, Result};

/// Proxy actions understood by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TranscribeLink,
    TranscribeFile,
    GetJobStatus,
    CancelJob,
    FetchCaptions,
    DownloadFile,
    CheckHealth,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::TranscribeLink => "transcribe_link",
            Action::TranscribeFile => "transcribe_file",
            Action::GetJobStatus => "get_job_status",
            Action::CancelJob => "cancel_job",
            Action::FetchCaptions => "fetch_captions",
            Action::DownloadFile => "download_file",
            Action::CheckHealth => "check_health",
        }
    }

    /// Build a request body of the form `{action, ...payload}`
    pub fn body(self, payload: Value) -> Value {
        let mut body = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        body.insert("action".to_string(), Value::String(self.as_str().to_string()));
        Value::Object(body)
    }
}

/// Media submitted for transcription
#[derive(Debug, Clone, PartialEq)]
pub enum JobInput {
    /// A link the backend downloads itself
    Link {
        url: String,
        /// Optional cookie jar forwarded to the downloader
        cookies: Option<String>,
    },
    /// A local file uploaded inline
    File { name: String, bytes: Vec<u8> },
}

/// A transcription request as the caller describes it
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub input: JobInput,
    pub model: String,
    pub timestamps: bool,
}

impl JobRequest {
    pub fn link(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            input: JobInput::Link { url: url.into(), cookies: None },
            model: model.into(),
            timestamps: false,
        }
    }

    pub fn file(name: impl Into<String>, bytes: Vec<u8>, model: impl Into<String>) -> Self {
        Self {
            input: JobInput::File { name: name.into(), bytes },
            model: model.into(),
            timestamps: false,
        }
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Attach cookies to a link request. Ignored for file uploads.
    pub fn with_cookies(mut self, value: impl Into<String>) -> Self {
        if let JobInput::Link { ref mut cookies, .. } = self.input {
            let value = value.into();
            *cookies = if value.trim().is_empty() { None } else { Some(value) };
        }
        self
    }

    /// The link or file name recorded in history
    pub fn display_input(&self) -> &str {
        match &self.input {
            JobInput::Link { url, .. } => url,
            JobInput::File { name, .. } => name,
        }
    }

    pub fn action(&self) -> Action {
        match self.input {
            JobInput::Link { .. } => Action::TranscribeLink,
            JobInput::File { .. } => Action::TranscribeFile,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.input {
            JobInput::Link { url, .. } if url.trim().is_empty() => {
                Err(Error::InvalidInput("a link or a file is required".to_string()))
            }
            JobInput::File { bytes, .. } if bytes.is_empty() => {
                Err(Error::InvalidInput("the uploaded file is empty".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Request body sent to the proxy
    pub fn to_body(&self) -> Value {
        let payload = match &self.input {
            JobInput::Link { url, cookies } => json!({
                "link": url.trim(),
                "model": self.model,
                "timestamps": self.timestamps,
                "cookies": cookies.clone().unwrap_or_default(),
            }),
            JobInput::File { name, bytes } => json!({
                "file_data": STANDARD.encode(bytes),
                "file_name": name,
                "model": self.model,
                "timestamps": self.timestamps,
            }),
        };
        self.action().body(payload)
    }
}

/// Handle returned by a successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub id: String,
}

impl SubmittedJob {
    pub fn from_value(value: &Value) -> Result<Self> {
        let id = match value.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(Error::Protocol("submission response is missing the job id".to_string())),
        };
        Ok(Self { id })
    }
}

/// Remote job status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    InQueue,
    InProgress,
    Completed,
    Failed,
    /// Any other value; treated as still running
    Other(String),
}

impl JobStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "IN_QUEUE" => JobStatus::InQueue,
            "IN_PROGRESS" => JobStatus::InProgress,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            other => JobStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::InQueue => "IN_QUEUE",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Other(other) => other,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical status response, after unwrapping double-wrapped payloads
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPayload {
    pub status: JobStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl StatusPayload {
    pub fn new(status: JobStatus) -> Self {
        Self { status, output: None, error: None }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Normalize a raw status response.
    ///
    /// An `output` object carrying its own `status` is the real payload.
    /// Otherwise the top-level `status` applies, and a bare `output` with no
    /// status at all means the job completed.
    pub fn from_value(value: Value) -> Result<Self> {
        let nested = value
            .get("output")
            .filter(|output| output.get("status").and_then(Value::as_str).is_some())
            .cloned();
        let canonical = nested.unwrap_or(value);

        let output = canonical.get("output").filter(|o| !o.is_null()).cloned();
        let error = canonical.get("error").and_then(error_text);

        let status = match canonical.get("status").and_then(Value::as_str) {
            Some(status) => JobStatus::parse(status),
            None if output.is_some() => JobStatus::Completed,
            None => {
                return Err(Error::Protocol(
                    "status response carries neither a status nor an output".to_string(),
                ))
            }
        };

        Ok(Self { status, output, error })
    }
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Performance numbers reported with a finished job
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub word_count: u64,
}

impl Metrics {
    fn from_value(value: &Value) -> Self {
        let total_time = value.get("total_time").and_then(Value::as_f64).unwrap_or(0.0);
        let word_count = value
            .get("word_count")
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
            .unwrap_or(0);
        Self { total_time, word_count }
    }
}

/// Terminal artifact of a completed job
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub text: String,
    pub metrics: Metrics,
}

impl PollResult {
    /// Extract text and metrics from a completed job's output.
    ///
    /// Text preference: `text`, `transcription`, `data.text`, then the whole
    /// output serialized.
    pub fn from_output(output: &Value) -> Self {
        let text = match output {
            Value::String(text) => text.clone(),
            _ => output
                .get("text")
                .and_then(Value::as_str)
                .or_else(|| output.get("transcription").and_then(Value::as_str))
                .or_else(|| output.get("data").and_then(|d| d.get("text")).and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| output.to_string()),
        };

        let metrics = output
            .get("performance")
            .filter(|v| v.is_object())
            .or_else(|| output.get("metrics").filter(|v| v.is_object()))
            .map(Metrics::from_value)
            .unwrap_or_default();

        Self { text, metrics }
    }
}

/// One subtitle track offered by the caption provider
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaptionTrack {
    #[serde(default, rename = "languageCode", alias = "language_code")]
    pub language_code: Option<String>,
    #[serde(
        default,
        rename = "auto-generated",
        alias = "auto_generated",
        deserialize_with = "deserialize_flag"
    )]
    pub auto_generated: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub captions: Vec<CaptionLine>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaptionLine {
    #[serde(default)]
    pub text: Option<String>,
}

impl CaptionTrack {
    pub fn track_type(&self) -> &'static str {
        if self.auto_generated {
            "auto"
        } else {
            "manual"
        }
    }

    fn into_captions(self) -> Captions {
        let track_type = self.track_type().to_string();
        let text = match self.text {
            Some(text) => text,
            None => self
                .captions
                .iter()
                .filter_map(|line| line.text.as_deref())
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        };
        Captions {
            text,
            language_code: self.language_code.unwrap_or_else(|| "unknown".to_string()),
            track_type,
        }
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::Number(n) => n.as_i64().map(|n| n != 0).unwrap_or(false),
        Value::String(s) => matches!(s.as_str(), "1" | "true" | "auto"),
        _ => false,
    })
}

/// Pick the human-authored track if there is one, else the first track
pub fn select_track(tracks: &[CaptionTrack]) -> Option<&CaptionTrack> {
    tracks.iter().find(|t| !t.auto_generated).or_else(|| tracks.first())
}

/// Caption text retrieved without a transcription job
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Captions {
    pub text: String,
    #[serde(default = "unknown")]
    pub language_code: String,
    #[serde(default = "unknown")]
    pub track_type: String,
}

fn unknown() -> String {
    "unknown".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CaptionsReply {
    Listing { tracks: Vec<CaptionTrack> },
    Selected(Captions),
}

impl Captions {
    /// Interpret a `fetch_captions` reply, applying the manual-first policy
    /// when the proxy hands back a raw track listing.
    pub fn from_value(link: &str, value: Value) -> Result<Self> {
        match serde_json::from_value::<CaptionsReply>(value)? {
            CaptionsReply::Selected(captions) => Ok(captions),
            CaptionsReply::Listing { tracks } => {
                let chosen = select_track(&tracks)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("no captions available for {link}")))?;
                Ok(chosen.into_captions())
            }
        }
    }

    /// Text stored in history, prefixed with the track description
    pub fn labelled_text(&self) -> String {
        format!(
            "[CC captions - {} / {}]\n\n{}",
            self.language_code, self.track_type, self.text
        )
    }
}

/// Target file format for the download relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    Txt,
    Srt,
    Vtt,
}

impl DownloadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadFormat::Txt => "txt",
            DownloadFormat::Srt => "srt",
            DownloadFormat::Vtt => "vtt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRequest {
    pub text: String,
    pub format: DownloadFormat,
    pub timestamps: bool,
}

/// A converted file returned by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct DownloadReply {
    #[serde(default)]
    success: bool,
    file_content_base64: Option<String>,
    file_name: Option<String>,
}

impl DownloadedFile {
    pub fn from_value(value: Value) -> Result<Self> {
        let reply: DownloadReply = serde_json::from_value(value)?;
        match (reply.success, reply.file_content_base64, reply.file_name) {
            (true, Some(content), Some(file_name)) if !file_name.is_empty() => {
                let bytes = STANDARD
                    .decode(content.trim())
                    .map_err(|e| Error::Protocol(format!("file content is not valid base64: {e}")))?;
                Ok(Self { file_name, bytes })
            }
            _ => Err(Error::Protocol("backend returned invalid file data".to_string())),
        }
    }
}

/// Health probe reply
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}
