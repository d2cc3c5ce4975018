#![allow(dead_code)]

use scriptoon::api::{
    GenerationParams, JobApi, JobMode, OutputImage, RemoteStatus, ResultPayload, StatusSnapshot,
    SubmittedJob,
};
use scriptoon::error::JobError;
use scriptoon::job::{CancelToken, Sleeper};
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// In-process [`JobApi`] that replays scripted responses and records every
/// call it receives.
#[derive(Default)]
pub struct ScriptedApi {
    statuses: Mutex<VecDeque<Result<StatusSnapshot, JobError>>>,
    result: Mutex<Option<Result<ResultPayload, JobError>>>,
    submit_error: Mutex<Option<JobError>>,
    failing_uploads: bool,
    on_result: Option<Box<dyn Fn()>>,
    calls: Mutex<Vec<String>>,
    submitted: Mutex<Vec<(GenerationParams, JobMode)>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(self, snapshot: StatusSnapshot) -> Self {
        self.statuses.lock().unwrap().push_back(Ok(snapshot));
        self
    }

    pub fn with_status_error(self, err: JobError) -> Self {
        self.statuses.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn with_result(self, result: Result<ResultPayload, JobError>) -> Self {
        *self.result.lock().unwrap() = Some(result);
        self
    }

    pub fn with_submit_error(self, err: JobError) -> Self {
        *self.submit_error.lock().unwrap() = Some(err);
        self
    }

    pub fn with_failing_uploads(mut self) -> Self {
        self.failing_uploads = true;
        self
    }

    /// Runs inside `fetch_result`, before the scripted payload is returned.
    pub fn with_result_hook(mut self, hook: impl Fn() + 'static) -> Self {
        self.on_result = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }

    pub fn submitted(&self) -> Vec<(GenerationParams, JobMode)> {
        self.submitted.lock().unwrap().clone()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }
}

impl JobApi for ScriptedApi {
    fn submit(
        &self,
        _credential: &str,
        params: &GenerationParams,
        mode: JobMode,
    ) -> Result<SubmittedJob, JobError> {
        self.record("submit");
        if let Some(err) = self.submit_error.lock().unwrap().take() {
            return Err(err);
        }
        self.submitted.lock().unwrap().push((params.clone(), mode));
        Ok(SubmittedJob {
            request_id: "req-1".into(),
            status_url: "mock://status".into(),
            result_url: "mock://result".into(),
        })
    }

    fn poll_once(&self, _credential: &str, _status_url: &str) -> Result<StatusSnapshot, JobError> {
        self.record("poll");
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(StatusSnapshot::queued()))
    }

    fn fetch_result(&self, _credential: &str, _result_url: &str) -> Result<ResultPayload, JobError> {
        self.record("result");
        if let Some(hook) = &self.on_result {
            hook();
        }
        self.result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(ResultPayload::default()))
    }

    fn upload_reference_image(
        &self,
        _credential: &str,
        _bytes: &[u8],
        _mime_type: &str,
        filename: &str,
    ) -> Result<String, JobError> {
        self.record("upload");
        if self.failing_uploads {
            return Err(JobError::Upload("all upload attempts failed".into()));
        }
        Ok(format!("https://cdn/{filename}"))
    }
}

pub fn image(url: &str) -> OutputImage {
    OutputImage {
        url: url.into(),
        ..OutputImage::default()
    }
}

pub fn snapshot(status: RemoteStatus) -> StatusSnapshot {
    StatusSnapshot {
        status,
        ..StatusSnapshot::queued()
    }
}

pub fn completed(urls: &[&str]) -> StatusSnapshot {
    StatusSnapshot {
        status: RemoteStatus::Completed,
        images: urls.iter().map(|u| image(u)).collect(),
        ..StatusSnapshot::queued()
    }
}

pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

/// Trips the cancel token during the n-th sleep (1-based).
pub struct CancelDuringSleep {
    pub token: CancelToken,
    pub at: usize,
    pub slept: Cell<usize>,
}

impl Sleeper for CancelDuringSleep {
    fn sleep(&self, _duration: Duration) {
        self.slept.set(self.slept.get() + 1);
        if self.slept.get() == self.at {
            self.token.cancel();
        }
    }
}
