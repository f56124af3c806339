//! Scripted gateway used by the poller, session and client tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::gateway::RemoteGateway;
use crate::protocol::{
    Captions, DownloadRequest, DownloadedFile, HealthStatus, JobRequest, JobStatus, StatusPayload,
    SubmittedJob,
};

pub(crate) enum Step {
    Reply(StatusPayload),
    Fail(Error),
    /// Never answer
    Hang,
}

pub(crate) struct ScriptedGateway {
    steps: Mutex<VecDeque<Step>>,
    captions: Mutex<Option<Captions>>,
    fail_cancel: AtomicBool,
    status_calls: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
    cancelled: Mutex<Vec<String>>,
    submitted: Mutex<Vec<JobRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            captions: Mutex::new(None),
            fail_cancel: AtomicBool::new(false),
            status_calls: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn then_status(self, status: JobStatus, times: usize) -> Self {
        for _ in 0..times {
            self.steps.lock().unwrap().push_back(Step::Reply(StatusPayload::new(status.clone())));
        }
        self
    }

    pub fn with_captions(self, captions: Captions) -> Self {
        *self.captions.lock().unwrap() = Some(captions);
        self
    }

    pub fn failing_cancel(self) -> Self {
        self.fail_cancel.store(true, Ordering::SeqCst);
        self
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<JobRequest> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteGateway for ScriptedGateway {
    async fn submit(&self, request: &JobRequest) -> Result<SubmittedJob> {
        request.validate()?;
        self.submitted.lock().unwrap().push(request.clone());
        Ok(SubmittedJob { id: "job-1".to_string() })
    }

    async fn get_status(&self, _job_id: &str) -> Result<StatusPayload> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(payload)) => Ok(payload),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(StatusPayload::new(JobStatus::InQueue)),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(job_id.to_string());
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(Error::Remote { status: 500, body: "cancel rejected".to_string() });
        }
        Ok(())
    }

    async fn fetch_captions(&self, link: &str) -> Result<Captions> {
        self.captions
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::NotFound(format!("no captions available for {link}")))
    }

    async fn download_file(&self, request: &DownloadRequest) -> Result<DownloadedFile> {
        Ok(DownloadedFile {
            file_name: format!("transcript.{}", request.format.as_str()),
            bytes: request.text.clone().into_bytes(),
        })
    }

    async fn health(&self) -> Result<HealthStatus> {
        Ok(HealthStatus { ready: true, details: Default::default() })
    }
}
