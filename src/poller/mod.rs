use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::is_source_unavailable;
use crate::error::{Error, Result};
use crate::gateway::RemoteGateway;
use crate::protocol::{JobStatus, PollResult};
use crate::tracker::{TerminalState, TrackedJob};

/// Fallback message when the backend fails a job without saying why
const GENERIC_FAILURE: &str = "Transcription failed";

/// Polling limits and backoff schedule
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Total status checks before giving up
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: f64,
    /// Fixed delay after a failed status check
    pub transient_retry_delay: Duration,
    /// Warn when a job is still queued after this many attempts
    pub queue_warning_after: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_retries: 45,
            initial_interval: Duration::from_millis(3000),
            max_interval: Duration::from_millis(15000),
            backoff_factor: 1.5,
            transient_retry_delay: Duration::from_secs(5),
            queue_warning_after: 10,
        }
    }
}

/// Exponential wait schedule: `initial, initial*f, initial*f^2, ...` capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    factor: f64,
}

impl Backoff {
    pub fn new(config: &PollConfig) -> Self {
        Self {
            next: config.initial_interval.min(config.max_interval),
            max: config.max_interval,
            factor: config.backoff_factor.max(1.0),
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.mul_f64(self.factor).min(self.max);
        Some(current)
    }
}

/// Where the job is from the caller's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Submitting,
    Polling,
}

/// Progress report sent before every status check
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub phase: Phase,
    pub attempt: u32,
    pub max_attempts: u32,
    /// Last status the backend reported, if any
    pub status: Option<JobStatus>,
}

/// Drives a submitted job to a terminal state
pub struct JobPoller<G> {
    gateway: Arc<G>,
    config: PollConfig,
}

impl<G: RemoteGateway> JobPoller<G> {
    pub fn new(gateway: Arc<G>, config: PollConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll `job_id` until it completes, fails, times out or `cancel` fires.
    ///
    /// Every iteration counts against `max_retries`, including ones whose
    /// status check failed transiently. The in-flight request and the wait
    /// between attempts are both abandoned as soon as `cancel` fires.
    pub async fn poll<F>(&self, job_id: &str, cancel: &CancellationToken, progress: F) -> Result<PollResult>
    where
        F: Fn(&Progress),
    {
        let max_attempts = self.config.max_retries;
        let mut job = TrackedJob::new(job_id);
        let mut backoff = Backoff::new(&self.config);

        for _ in 0..max_attempts {
            if cancel.is_cancelled() {
                record(&mut job, TrackedJob::mark_cancelled);
                return Err(Error::Cancelled);
            }

            let attempt = job.begin_attempt().unwrap_or(job.attempt);
            progress(&Progress {
                phase: Phase::Polling,
                attempt,
                max_attempts,
                status: job.last_status.clone(),
            });

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    record(&mut job, TrackedJob::mark_cancelled);
                    return Err(Error::Cancelled);
                }
                fetched = self.gateway.get_status(job_id) => fetched,
            };

            let delay = match fetched {
                Ok(payload) => {
                    record(&mut job, |j| j.observe(payload.status.clone()));
                    match payload.status {
                        JobStatus::Completed => {
                            let Some(output) = payload.output else {
                                record(&mut job, TrackedJob::mark_failed);
                                error!("Job {} completed without output", job_id);
                                return Err(Error::Protocol(format!(
                                    "job {job_id} completed without output"
                                )));
                            };
                            let result = PollResult::from_output(&output);
                            record(&mut job, TrackedJob::mark_completed);
                            info!(
                                "Job {} completed after {} attempts in {}ms ({} words)",
                                job_id,
                                attempt,
                                job.elapsed().num_milliseconds(),
                                result.metrics.word_count
                            );
                            return Ok(result);
                        }
                        JobStatus::Failed => {
                            let message = payload
                                .error
                                .or_else(|| failure_from_output(payload.output.as_ref()))
                                .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                            record(&mut job, TrackedJob::mark_failed);
                            error!("Job {} failed: {}", job_id, message);
                            return Err(Error::JobFailed { job_id: job_id.to_string(), message });
                        }
                        status => {
                            if status == JobStatus::InQueue && attempt > self.config.queue_warning_after {
                                warn!(
                                    "Job {} still queued after {} attempts, the backend may be busy",
                                    job_id, attempt
                                );
                            }
                            debug!("Job {} is {} (attempt {}/{})", job_id, status, attempt, max_attempts);
                            backoff.next().unwrap_or(self.config.max_interval)
                        }
                    }
                }
                Err(e) if is_fatal(&e) => {
                    stop(&mut job, &e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "Status check {}/{} for job {} failed, retrying: {}",
                        attempt, max_attempts, job_id, e
                    );
                    self.config.transient_retry_delay
                }
            };

            if attempt >= max_attempts {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    record(&mut job, TrackedJob::mark_cancelled);
                    return Err(Error::Cancelled);
                }
                _ = sleep(delay) => {}
            }
        }

        record(&mut job, TrackedJob::mark_timed_out);
        error!("Job {} did not finish after {} attempts", job_id, max_attempts);
        Err(Error::Timeout { job_id: job_id.to_string(), attempts: max_attempts })
    }
}

fn record<F>(job: &mut TrackedJob, step: F)
where
    F: FnOnce(&mut TrackedJob) -> std::result::Result<(), TerminalState>,
{
    if let Err(TerminalState(state)) = step(job) {
        debug!("Job {} is already {}", job.job_id, state);
    }
}

/// Settle a job whose status check failed fatally
fn stop(job: &mut TrackedJob, error: &Error) {
    if error.is_cancelled() {
        record(job, TrackedJob::mark_cancelled);
        info!("Job {} cancelled by the backend", job.job_id);
    } else {
        record(job, TrackedJob::mark_failed);
        error!("Job {} stopped: {}", job.job_id, error);
    }
}

fn failure_from_output(output: Option<&serde_json::Value>) -> Option<String> {
    let error = output?.get("error")?;
    match error.as_str() {
        Some(text) if !text.is_empty() => Some(text.to_string()),
        Some(_) => None,
        None => Some(error.to_string()),
    }
}

/// Errors that retrying the same status check cannot fix
fn is_fatal(error: &Error) -> bool {
    match error {
        Error::MissingCredential | Error::Cancelled => true,
        Error::Remote { body, .. } => is_source_unavailable(body),
        Error::Protocol(message) => is_source_unavailable(message),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusPayload;
    use crate::testing::{ScriptedGateway, Step};
    use crate::tracker::PollState;
    use serde_json::json;
    use std::sync::Mutex;

    fn poller(gateway: ScriptedGateway) -> (JobPoller<ScriptedGateway>, Arc<ScriptedGateway>) {
        let gateway = Arc::new(gateway);
        (JobPoller::new(gateway.clone(), PollConfig::default()), gateway)
    }

    fn completed(output: serde_json::Value) -> Step {
        Step::Reply(StatusPayload::new(JobStatus::Completed).with_output(output))
    }

    #[test]
    fn test_backoff_schedule() {
        let delays: Vec<u128> = Backoff::new(&PollConfig::default())
            .take(7)
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![3000, 4500, 6750, 10125, 15000, 15000, 15000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_after_queue_and_progress() {
        let gateway = ScriptedGateway::new()
            .then_status(JobStatus::InQueue, 2)
            .then_status(JobStatus::InProgress, 2)
            .then(completed(json!({"text": "hello world"})));
        let (poller, gateway) = poller(gateway);

        let result = poller
            .poll("job-1", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(result.text, "hello world");
        assert_eq!(result.metrics.total_time, 0.0);
        assert_eq!(result.metrics.word_count, 0);
        assert_eq!(gateway.status_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_follow_backoff() {
        let gateway = ScriptedGateway::new()
            .then_status(JobStatus::InProgress, 5)
            .then(completed(json!("done")));
        let (poller, gateway) = poller(gateway);

        poller.poll("job-1", &CancellationToken::new(), |_| {}).await.unwrap();

        let times = gateway.call_times();
        let gaps: Vec<u128> = times.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        assert_eq!(gaps, vec![3000, 4500, 6750, 10125, 15000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reports_every_attempt() {
        let gateway = ScriptedGateway::new()
            .then_status(JobStatus::InQueue, 2)
            .then(completed(json!({"text": ""})));
        let (poller, _) = poller(gateway);
        let seen = Mutex::new(Vec::new());

        let result = poller
            .poll("job-1", &CancellationToken::new(), |p| seen.lock().unwrap().push(p.clone()))
            .await
            .unwrap();

        assert_eq!(result.text, "");
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].attempt, 1);
        assert_eq!(seen[0].status, None);
        assert_eq!(seen[2].attempt, 3);
        assert_eq!(seen[2].max_attempts, 45);
        assert_eq!(seen[2].phase, Phase::Polling);
        assert_eq!(seen[2].status, Some(JobStatus::InQueue));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_keeps_backend_message() {
        let gateway = ScriptedGateway::new()
            .then_status(JobStatus::InProgress, 1)
            .then(Step::Reply(
                StatusPayload::new(JobStatus::Failed).with_error("CUDA out of memory"),
            ));
        let (poller, _) = poller(gateway);

        let err = poller.poll("job-1", &CancellationToken::new(), |_| {}).await.unwrap_err();
        match err {
            Error::JobFailed { job_id, message } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(message, "CUDA out of memory");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_without_message_uses_fallback() {
        let gateway = ScriptedGateway::new().then_status(JobStatus::Failed, 1);
        let (poller, _) = poller(gateway);

        let err = poller.poll("job-1", &CancellationToken::new(), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::JobFailed { ref message, .. } if message == GENERIC_FAILURE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_without_output_is_protocol_error() {
        let gateway = ScriptedGateway::new().then_status(JobStatus::Completed, 1);
        let (poller, gateway) = poller(gateway);

        let err = poller.poll("job-1", &CancellationToken::new(), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(gateway.status_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_budget() {
        let (poller, gateway) = poller(ScriptedGateway::new());

        let err = poller.poll("job-9", &CancellationToken::new(), |_| {}).await.unwrap_err();

        assert!(matches!(err, Error::Timeout { ref job_id, attempts: 45 } if job_id == "job-9"));
        assert_eq!(gateway.status_calls(), 45);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried_after_fixed_delay() {
        let gateway = ScriptedGateway::new()
            .then(Step::Fail(Error::Remote { status: 502, body: "bad gateway".into() }))
            .then(Step::Fail(Error::Protocol("truncated body".into())))
            .then(completed(json!({"transcription": "ok"})));
        let (poller, gateway) = poller(gateway);

        let result = poller.poll("job-1", &CancellationToken::new(), |_| {}).await.unwrap();

        assert_eq!(result.text, "ok");
        let times = gateway.call_times();
        assert_eq!((times[1] - times[0]).as_millis(), 5000);
        assert_eq!((times[2] - times[1]).as_millis(), 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_count_against_budget() {
        let mut gateway = ScriptedGateway::new();
        for _ in 0..45 {
            gateway = gateway.then(Step::Fail(Error::Remote { status: 503, body: "busy".into() }));
        }
        let (poller, gateway) = poller(gateway);

        let err = poller.poll("job-1", &CancellationToken::new(), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { attempts: 45, .. }));
        assert_eq!(gateway.status_calls(), 45);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_unavailable_stops_polling() {
        let gateway = ScriptedGateway::new().then(Step::Fail(Error::Remote {
            status: 500,
            body: "ERROR: [youtube] HTTP Error 403: Forbidden".into(),
        }));
        let (poller, gateway) = poller(gateway);

        let err = poller.poll("job-1", &CancellationToken::new(), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Remote { status: 500, .. }));
        assert_eq!(gateway.status_calls(), 1);
    }

    #[test]
    fn test_stop_keeps_cancelled_apart_from_failed() {
        let mut cancelled = TrackedJob::new("job-1");
        stop(&mut cancelled, &Error::Cancelled);
        assert_eq!(cancelled.state, PollState::Cancelled);

        let mut failed = TrackedJob::new("job-2");
        stop(&mut failed, &Error::MissingCredential);
        assert_eq!(failed.state, PollState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_status_check_stops_polling() {
        let gateway = ScriptedGateway::new()
            .then(Step::Fail(Error::Cancelled))
            .then(completed(json!({"text": "never read"})));
        let (poller, gateway) = poller(gateway);

        let err = poller.poll("job-1", &CancellationToken::new(), |_| {}).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(gateway.status_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_stops_further_checks() {
        let gateway = ScriptedGateway::new()
            .then_status(JobStatus::InProgress, 9)
            .then(completed(json!({"text": "too late"})));
        let (poller, gateway) = poller(gateway);
        let token = CancellationToken::new();

        // Checks happen at 0s, 3s and 7.5s; the fourth would be at 14.25s
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(8)).await;
            canceller.cancel();
        });

        let err = poller.poll("job-1", &token, |_| {}).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(gateway.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_check() {
        let gateway = ScriptedGateway::new().then(Step::Hang);
        let (poller, gateway) = poller(gateway);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = poller.poll("job-1", &token, |_| {}).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(gateway.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_calls() {
        let (poller, gateway) = poller(ScriptedGateway::new());
        let token = CancellationToken::new();
        token.cancel();

        let err = poller.poll("job-1", &token, |_| {}).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(gateway.status_calls(), 0);
    }
}
