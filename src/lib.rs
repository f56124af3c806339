//! Subtitle Helper - transcription job orchestration
//!
//! This crate submits media (a link or a local file) to a remote, asynchronous
//! transcription backend through a single proxy, follows the job to completion
//! and keeps a local history of the results. It features:
//!
//! - A typed gateway to the proxy with bearer-token authentication
//! - A polling loop with exponential backoff and bounded retries
//! - Cooperative cancellation of both the local wait and the remote job
//! - A stable error taxonomy with remediation hints
//! - Sled-backed history with MessagePack records
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use subtitle_helper::{
//!     GatewayConfig, HistoryStore, HttpGateway, JobRequest, PollConfig, TranscriptionClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = HttpGateway::new(GatewayConfig {
//!         api_key: Some("my-token".to_string()),
//!         ..GatewayConfig::default()
//!     })?;
//!     let store = HistoryStore::new_temp()?;
//!     let client = TranscriptionClient::new(Arc::new(gateway), store, PollConfig::default());
//!
//!     let request = JobRequest::link("https://youtu.be/dQw4w9WgXcQ", "large-v3");
//!     let record = client
//!         .transcribe(request, |p| println!("attempt {}/{}", p.attempt, p.max_attempts))
//!         .await?;
//!     println!("{}", record.transcription);
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod poller;
pub mod protocol;
pub mod session;
pub mod store;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types for convenience
pub use classify::{classify, Diagnosis};
pub use client::TranscriptionClient;
pub use config::{AppConfig, ConnectionArgs};
pub use error::{Error, ErrorKind, Result};
pub use gateway::{GatewayConfig, HttpGateway, RemoteGateway};
pub use poller::{Backoff, JobPoller, Phase, PollConfig, Progress};
pub use protocol::{Captions, DownloadFormat, JobInput, JobRequest, JobStatus, Metrics, PollResult};
pub use session::{CancelOutcome, CancellationCoordinator, JobSession, RemoteCancel};
pub use store::{HistoryRecord, HistoryStore, RecordStore};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Default history database location
pub const DEFAULT_HISTORY_PATH: &str = "/tmp/subtitle-helper/history";

/// Utility functions for common operations
pub mod utils {
    /// Number of whitespace-separated words
    pub fn word_count(text: &str) -> u64 {
        text.split_whitespace().count() as u64
    }

    /// Short single-line preview of a transcription
    pub fn preview(text: &str, max_chars: usize) -> String {
        let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.chars().count() <= max_chars {
            line
        } else {
            let cut: String = line.chars().take(max_chars).collect();
            format!("{cut}...")
        }
    }
}
