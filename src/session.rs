use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::gateway::RemoteGateway;

/// One submit/poll cycle in flight
#[derive(Debug, Clone)]
pub struct JobSession {
    id: Uuid,
    token: CancellationToken,
    job_id: Arc<Mutex<Option<String>>>,
}

impl JobSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
            job_id: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token observed by the submit call and the poll loop
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Remember the remote job id so a cancel can be forwarded
    pub fn set_job_id(&self, job_id: impl Into<String>) {
        *lock(&self.job_id) = Some(job_id.into());
    }

    pub fn job_id(&self) -> Option<String> {
        lock(&self.job_id).clone()
    }
}

/// What happened to the remote job when a session was cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCancel {
    /// No job id had been issued yet
    NotAttempted,
    Requested,
    /// The backend refused or could not be reached; the local cancel still stands
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Nothing was running
    NoActiveJob,
    Cancelled { job_id: Option<String>, remote: RemoteCancel },
}

/// Owns the single live session and routes cancel requests to it
pub struct CancellationCoordinator<G> {
    gateway: Arc<G>,
    active: Mutex<Option<JobSession>>,
}

impl<G: RemoteGateway> CancellationCoordinator<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway, active: Mutex::new(None) }
    }

    /// Start a session. Fails if one is already live.
    pub fn begin(&self) -> Result<JobSession> {
        let mut active = lock(&self.active);
        if active.is_some() {
            return Err(Error::SessionActive);
        }
        let session = JobSession::new();
        *active = Some(session.clone());
        Ok(session)
    }

    /// Release the slot held by `session`. A stale session is ignored.
    pub fn finish(&self, session: &JobSession) {
        let mut active = lock(&self.active);
        if active.as_ref().map(JobSession::id) == Some(session.id) {
            *active = None;
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Cancel the live session, if any.
    ///
    /// The token fires first, so the local wait ends regardless of how the
    /// remote cancel goes. The slot is free again when this returns.
    pub async fn cancel(&self) -> CancelOutcome {
        let Some(session) = lock(&self.active).take() else {
            info!("Cancel requested with no active job");
            return CancelOutcome::NoActiveJob;
        };

        session.token.cancel();
        let job_id = session.job_id();

        let remote = match &job_id {
            None => RemoteCancel::NotAttempted,
            Some(id) => match self.gateway.cancel(id).await {
                Ok(()) => {
                    info!("Cancel request sent for job {}", id);
                    RemoteCancel::Requested
                }
                Err(e) => {
                    warn!("Remote cancel for job {} failed: {}", id, e);
                    RemoteCancel::Failed(e.to_string())
                }
            },
        };

        CancelOutcome::Cancelled { job_id, remote }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
