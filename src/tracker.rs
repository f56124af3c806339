use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, info};

use crate::protocol::JobStatus;

/// Local lifecycle of a polled job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Job id issued, no status check yet
    Submitted,
    /// At least one status check made, job not finished
    Polling,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Submitted | PollState::Polling)
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollState::Submitted => "SUBMITTED",
            PollState::Polling => "POLLING",
            PollState::Completed => "COMPLETED",
            PollState::Failed => "FAILED",
            PollState::Cancelled => "CANCELLED",
            PollState::TimedOut => "TIMED_OUT",
        };
        f.write_str(name)
    }
}

/// A transition was requested out of a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalState(pub PollState);

/// Tracks one job through its polling lifecycle
#[derive(Debug, Clone)]
pub struct TrackedJob {
    pub job_id: String,
    pub state: PollState,
    /// Last status reported by the backend
    pub last_status: Option<JobStatus>,
    /// Number of polling iterations started
    pub attempt: u32,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl TrackedJob {
    pub fn new(job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            state: PollState::Submitted,
            last_status: None,
            attempt: 0,
            first_seen: now,
            last_updated: now,
        }
    }

    fn transition(&mut self, next: PollState) -> Result<(), TerminalState> {
        if self.state.is_terminal() {
            return Err(TerminalState(self.state));
        }
        if self.state != next {
            info!("Job {} {} -> {}", self.job_id, self.state, next);
        }
        self.state = next;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Start a new polling iteration
    pub fn begin_attempt(&mut self) -> Result<u32, TerminalState> {
        self.transition(PollState::Polling)?;
        self.attempt += 1;
        debug!("Job {} attempt {}", self.job_id, self.attempt);
        Ok(self.attempt)
    }

    /// Record a status reported by the backend
    pub fn observe(&mut self, status: JobStatus) -> Result<(), TerminalState> {
        if self.state.is_terminal() {
            return Err(TerminalState(self.state));
        }
        self.last_status = Some(status);
        self.last_updated = Utc::now();
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), TerminalState> {
        self.transition(PollState::Completed)
    }

    pub fn mark_failed(&mut self) -> Result<(), TerminalState> {
        self.transition(PollState::Failed)
    }

    pub fn mark_cancelled(&mut self) -> Result<(), TerminalState> {
        self.transition(PollState::Cancelled)
    }

    pub fn mark_timed_out(&mut self) -> Result<(), TerminalState> {
        self.transition(PollState::TimedOut)
    }

    /// Time spent from submission to the last update
    pub fn elapsed(&self) -> chrono::Duration {
        self.last_updated - self.first_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_to_completion() {
        let mut job = TrackedJob::new("job-1");
        assert_eq!(job.state, PollState::Submitted);

        assert_eq!(job.begin_attempt().unwrap(), 1);
        job.observe(JobStatus::InQueue).unwrap();
        assert_eq!(job.begin_attempt().unwrap(), 2);
        job.observe(JobStatus::Completed).unwrap();
        job.mark_completed().unwrap();

        assert_eq!(job.state, PollState::Completed);
        assert_eq!(job.last_status, Some(JobStatus::Completed));
        assert!(job.elapsed() >= chrono::Duration::zero());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = TrackedJob::new("job-2");
        job.begin_attempt().unwrap();
        job.mark_cancelled().unwrap();

        assert_eq!(job.begin_attempt(), Err(TerminalState(PollState::Cancelled)));
        assert_eq!(job.mark_completed(), Err(TerminalState(PollState::Cancelled)));
        assert!(job.observe(JobStatus::Completed).is_err());
        assert_eq!(job.attempt, 1);
    }

    #[test]
    fn test_submitted_can_be_cancelled() {
        let mut job = TrackedJob::new("job-3");
        job.mark_cancelled().unwrap();
        assert!(job.state.is_terminal());
        assert_eq!(job.state.to_string(), "CANCELLED");
    }
}
