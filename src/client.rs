use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::gateway::RemoteGateway;
use crate::poller::{JobPoller, Phase, PollConfig, Progress};
use crate::protocol::{
    DownloadFormat, DownloadRequest, DownloadedFile, HealthStatus, JobRequest, Metrics, StatusPayload,
};
use crate::session::{CancelOutcome, CancellationCoordinator, JobSession};
use crate::store::{HistoryRecord, RecordStore, CAPTIONS_MODEL};
use crate::utils::word_count;

/// High-level entry point: submit, poll, persist
pub struct TranscriptionClient<G, S> {
    gateway: Arc<G>,
    poller: JobPoller<G>,
    coordinator: CancellationCoordinator<G>,
    store: S,
}

impl<G, S> TranscriptionClient<G, S>
where
    G: RemoteGateway,
    S: RecordStore,
{
    pub fn new(gateway: Arc<G>, store: S, config: PollConfig) -> Self {
        Self {
            poller: JobPoller::new(gateway.clone(), config),
            coordinator: CancellationCoordinator::new(gateway.clone()),
            gateway,
            store,
        }
    }

    /// Whether a transcription is currently in flight
    pub fn is_busy(&self) -> bool {
        self.coordinator.is_active()
    }

    /// Run one transcription end to end and save the result to history.
    ///
    /// Only one transcription may run at a time; a second call while one is in
    /// flight fails with [`Error::SessionActive`]. The session is released on
    /// every exit path.
    pub async fn transcribe<F>(&self, request: JobRequest, progress: F) -> Result<HistoryRecord>
    where
        F: Fn(&Progress),
    {
        request.validate()?;

        let session = self.coordinator.begin()?;
        let _guard = SessionGuard { coordinator: &self.coordinator, session: session.clone() };

        progress(&Progress {
            phase: Phase::Submitting,
            attempt: 0,
            max_attempts: self.poller.config().max_retries,
            status: None,
        });

        let submitted = tokio::select! {
            biased;
            _ = session.token().cancelled() => return Err(Error::Cancelled),
            submitted = self.gateway.submit(&request) => submitted?,
        };
        session.set_job_id(&submitted.id);
        info!("Submitted job {} ({})", submitted.id, request.model);

        let result = self.poller.poll(&submitted.id, session.token(), &progress).await?;

        let input = request.display_input().to_string();
        let record = HistoryRecord::new(
            input,
            request.model,
            request.timestamps,
            result.text,
            result.metrics,
        );
        self.store.add(record).await
    }

    /// Fetch existing captions for a link and save them to history
    pub async fn fetch_captions(&self, link: &str) -> Result<HistoryRecord> {
        let captions = self.gateway.fetch_captions(link).await?;
        info!(
            "Fetched {} captions ({}) for {}",
            captions.track_type, captions.language_code, link
        );

        let metrics = Metrics { total_time: 0.0, word_count: word_count(&captions.text) };
        let record = HistoryRecord::new(link.trim(), CAPTIONS_MODEL, false, captions.labelled_text(), metrics);
        self.store.add(record).await
    }

    /// Cancel the running transcription, if there is one
    pub async fn cancel(&self) -> CancelOutcome {
        self.coordinator.cancel().await
    }

    /// One-off status check for a job submitted elsewhere
    pub async fn job_status(&self, job_id: &str) -> Result<StatusPayload> {
        self.gateway.get_status(job_id).await
    }

    /// One-off remote cancel for a job submitted elsewhere
    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        self.gateway.cancel(job_id).await
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        self.store.list(limit).await
    }

    pub async fn record(&self, id: u64) -> Result<HistoryRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("history record {id}")))
    }

    pub async fn delete_record(&self, id: u64) -> Result<()> {
        self.store.delete(id).await
    }

    pub async fn clear_history(&self) -> Result<()> {
        warn!("Clearing all history records");
        self.store.clear().await
    }

    /// Convert a saved transcription to a file on the backend
    pub async fn download(&self, id: u64, format: DownloadFormat) -> Result<DownloadedFile> {
        let record = self.record(id).await?;
        let request = DownloadRequest {
            text: record.transcription,
            format,
            timestamps: record.timestamps_enabled,
        };
        self.gateway.download_file(&request).await
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.gateway.health().await
    }
}

/// Releases the session slot however `transcribe` exits
struct SessionGuard<'a, G: RemoteGateway> {
    coordinator: &'a CancellationCoordinator<G>,
    session: JobSession,
}

impl<G: RemoteGateway> Drop for SessionGuard<'_, G> {
    fn drop(&mut self) {
        self.coordinator.finish(&self.session);
    }
}
