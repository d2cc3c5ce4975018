use super::cancel::CancelToken;
use super::record::{JobRecord, JobStatus};
use crate::api::{GenerationParams, JobApi, JobMode, OutputImage, RemoteStatus, MAX_IMAGE_COUNT};
use crate::error::{JobError, ValidationError};
use crate::prefs::{load_credential, validate_credential};
use crate::references::{parse_data_url, ReferenceImage, MAX_REFERENCE_IMAGES};
use crate::settings::Settings;
use crate::store::{load_json, save_json, KeyValueStore, JOB_RECORD_KEY, OUTPUT_IMAGES_KEY};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::mpsc::Sender;
use std::time::Duration;

const DEFAULT_FAILURE_MESSAGE: &str = "image generation failed";
const NO_IMAGES_MESSAGE: &str = "no images were generated";
const STORAGE_FULL_WARNING: &str =
    "storage is full: results are shown but were not saved to history";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub record_ttl: chrono::Duration,
    pub failure_grace: chrono::Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
            record_ttl: chrono::Duration::hours(24),
            failure_grace: chrono::Duration::minutes(5),
        }
    }
}

impl From<&Settings> for PollConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            interval: settings.poll_interval(),
            max_attempts: settings.max_poll_attempts(),
            record_ttl: chrono::Duration::hours(settings.record_ttl_hours),
            failure_grace: chrono::Duration::seconds(settings.failure_grace_secs),
        }
    }
}

/// Suspension point of the poll loop.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Notifications for whatever renders the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Status(String),
    /// Latest log line reported by the remote job.
    Progress(String),
    Displayed(Vec<OutputImage>),
    Warning(String),
    Failed(String),
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    Polling,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    NoRecord,
    Expired,
    AlreadyDisplayed,
    /// Completed record without cached outputs; nothing to show.
    Discarded,
    Replayed(Vec<OutputImage>),
    Resumed(Vec<OutputImage>),
    PreviousFailure { message: String, retained: bool },
}

/// Owns the single job slot for one process.
///
/// Callers must not start a second generation while one is polling: the
/// record slot would be overwritten.
pub struct JobSession<S, A> {
    store: S,
    api: A,
    config: PollConfig,
    sleeper: Box<dyn Sleeper>,
    cancel: CancelToken,
    events: Option<Sender<JobEvent>>,
    phase: JobPhase,
    current: Option<JobRecord>,
    storage_warned: bool,
}

impl<S: KeyValueStore, A: JobApi> JobSession<S, A> {
    pub fn new(store: S, api: A, config: PollConfig) -> Self {
        Self {
            store,
            api,
            config,
            sleeper: Box::new(ThreadSleeper),
            cancel: CancelToken::new(),
            events: None,
            phase: JobPhase::Idle,
            current: None,
            storage_warned: false,
        }
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn with_events(mut self, events: Sender<JobEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn current_record(&self) -> Option<&JobRecord> {
        self.current.as_ref()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cancellation. Honoured at the next poll checkpoint; a request
    /// already on the wire is not aborted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Full generation flow: validate, upload references, submit, poll and
    /// display the results.
    pub fn generate(
        &mut self,
        mut params: GenerationParams,
        references: &[ReferenceImage],
    ) -> Result<Vec<OutputImage>, JobError> {
        params.prompt = params.prompt.trim().to_string();
        let credential = self.validate(&params, references)?;
        self.cancel.reset();

        let mode = if references.is_empty() {
            JobMode::Generate
        } else {
            JobMode::Edit
        };
        if mode == JobMode::Edit {
            self.emit(JobEvent::Status("uploading reference images".into()));
            params.image_urls = self.resolve_reference_urls(&credential, references);
        }

        let images = self.submit_and_poll(&credential, params, mode)?;
        self.display(&images);
        Ok(images)
    }

    /// Submit and poll to completion. Results are persisted but not marked
    /// displayed; call [`JobSession::display`] once they are shown.
    pub fn submit(
        &mut self,
        credential: &str,
        params: GenerationParams,
        mode: JobMode,
    ) -> Result<Vec<OutputImage>, JobError> {
        self.cancel.reset();
        self.submit_and_poll(credential, params, mode)
    }

    /// Show results and set the displayed marker. Returns false when the
    /// current record was already displayed, in which case nothing is shown.
    pub fn display(&mut self, images: &[OutputImage]) -> bool {
        if self.current.as_ref().is_some_and(|r| r.displayed_to_user) {
            return false;
        }
        self.emit(JobEvent::Displayed(images.to_vec()));
        let Some(record) = self.current.as_mut() else {
            return false;
        };
        record.displayed_to_user = true;
        tracing::info!(request_id = %record.request_id, "generation marked as displayed");
        self.persist_record();
        true
    }

    pub fn recover(&mut self) -> Result<RecoveryOutcome, JobError> {
        self.recover_at(Utc::now())
    }

    /// Startup recovery of the persisted job slot.
    pub fn recover_at(&mut self, now: DateTime<Utc>) -> Result<RecoveryOutcome, JobError> {
        let Some(record) = load_json::<_, JobRecord>(&self.store, JOB_RECORD_KEY) else {
            tracing::debug!("no generation state found");
            return Ok(RecoveryOutcome::NoRecord);
        };

        if record.is_expired(now, self.config.record_ttl) {
            tracing::info!(request_id = %record.request_id, "generation state expired, removing");
            self.clear_record();
            return Ok(RecoveryOutcome::Expired);
        }

        if record.displayed_to_user {
            tracing::debug!(request_id = %record.request_id, "generation already displayed, clearing");
            self.clear_record();
            return Ok(RecoveryOutcome::AlreadyDisplayed);
        }

        let status = record.status;
        let message = record.error.clone();
        self.current = Some(record);

        match status {
            JobStatus::Completed => {
                let images: Vec<OutputImage> =
                    load_json(&self.store, OUTPUT_IMAGES_KEY).unwrap_or_default();
                if images.is_empty() {
                    tracing::warn!("completed generation has no cached outputs, discarding");
                    self.clear_record();
                    return Ok(RecoveryOutcome::Discarded);
                }
                tracing::info!(count = images.len(), "restoring completed generation from cache");
                self.phase = JobPhase::Completed;
                self.display(&images);
                Ok(RecoveryOutcome::Replayed(images))
            }
            JobStatus::Polling => self.resume(),
            JobStatus::Failed => {
                let message = message.unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.into());
                self.phase = JobPhase::Failed;
                self.emit(JobEvent::Failed(message.clone()));
                let retained = !self.sweep_failed_at(now);
                Ok(RecoveryOutcome::PreviousFailure { message, retained })
            }
        }
    }

    pub fn sweep_failed(&mut self) -> bool {
        self.sweep_failed_at(Utc::now())
    }

    /// Delete a failed record once its grace window has passed.
    pub fn sweep_failed_at(&mut self, now: DateTime<Utc>) -> bool {
        let Some(record) = load_json::<_, JobRecord>(&self.store, JOB_RECORD_KEY) else {
            return false;
        };
        if record.status == JobStatus::Failed
            && record.failure_grace_elapsed(now, self.config.failure_grace)
        {
            tracing::debug!(request_id = %record.request_id, "failure grace window elapsed");
            self.clear_record();
            return true;
        }
        false
    }

    fn resume(&mut self) -> Result<RecoveryOutcome, JobError> {
        let credential = match load_credential(&self.store).map(|k| validate_credential(&k)) {
            Some(Ok(key)) => key,
            _ => {
                tracing::error!("cannot resume generation without an API key");
                self.clear_record();
                self.phase = JobPhase::Failed;
                self.emit(JobEvent::Failed(JobError::MissingCredential.to_string()));
                return Err(JobError::MissingCredential);
            }
        };

        if let Some(record) = &self.current {
            tracing::info!(request_id = %record.request_id, "resuming polling for interrupted generation");
        }
        self.emit(JobEvent::Status("resuming previous generation".into()));
        self.cancel.reset();
        let images = self.run_poll_loop(&credential)?;
        self.display(&images);
        Ok(RecoveryOutcome::Resumed(images))
    }

    fn validate(
        &self,
        params: &GenerationParams,
        references: &[ReferenceImage],
    ) -> Result<String, ValidationError> {
        if params.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        if params.count == 0 || params.count > MAX_IMAGE_COUNT {
            return Err(ValidationError::InvalidCount {
                count: params.count,
                max: MAX_IMAGE_COUNT,
            });
        }
        if references.len() > MAX_REFERENCE_IMAGES {
            return Err(ValidationError::TooManyReferenceImages {
                count: references.len(),
                max: MAX_REFERENCE_IMAGES,
            });
        }
        let raw = load_credential(&self.store).ok_or(ValidationError::MissingCredential)?;
        validate_credential(&raw)
    }

    /// Upload each reference sequentially; any image that cannot be uploaded
    /// is sent inline as its data URL.
    fn resolve_reference_urls(&self, credential: &str, references: &[ReferenceImage]) -> Vec<String> {
        references
            .iter()
            .enumerate()
            .map(|(index, reference)| {
                let Some(data) = parse_data_url(&reference.data_url) else {
                    return reference.data_url.clone();
                };
                let filename = if reference.file_name.is_empty() {
                    format!("image-{index}.jpg")
                } else {
                    reference.file_name.clone()
                };
                match self.api.upload_reference_image(
                    credential,
                    &data.bytes,
                    &data.mime_type,
                    &filename,
                ) {
                    Ok(url) => url,
                    Err(err) => {
                        tracing::warn!(%filename, %err, "upload failed, sending image inline");
                        reference.data_url.clone()
                    }
                }
            })
            .collect()
    }

    fn submit_and_poll(
        &mut self,
        credential: &str,
        params: GenerationParams,
        mode: JobMode,
    ) -> Result<Vec<OutputImage>, JobError> {
        self.phase = JobPhase::Idle;
        self.emit(JobEvent::Status("submitting generation request".into()));
        let job = match self.api.submit(credential, &params, mode) {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(%err, "submission failed");
                self.phase = JobPhase::Failed;
                self.emit(JobEvent::Failed(err.to_string()));
                return Err(err);
            }
        };

        self.store.remove(OUTPUT_IMAGES_KEY);
        self.current = Some(JobRecord::new(job, params, mode, Utc::now()));
        self.persist_record();
        self.emit(JobEvent::Status("request submitted, generating images".into()));
        self.run_poll_loop(credential)
    }

    fn run_poll_loop(&mut self, credential: &str) -> Result<Vec<OutputImage>, JobError> {
        let Some((status_url, result_url)) = self
            .current
            .as_ref()
            .map(|r| (r.status_url.clone(), r.result_url.clone()))
        else {
            return Err(JobError::Transport("no active job to poll".into()));
        };

        self.phase = JobPhase::Polling;
        match self.poll_until_done(credential, &status_url, &result_url) {
            Ok(images) => {
                tracing::info!(count = images.len(), "generation completed");
                self.phase = JobPhase::Completed;
                Ok(images)
            }
            Err(JobError::Cancelled) => {
                tracing::info!("generation cancelled by user");
                self.phase = JobPhase::Cancelled;
                self.clear_record();
                self.emit(JobEvent::Cancelled);
                Err(JobError::Cancelled)
            }
            Err(err) => {
                tracing::error!(%err, "generation failed");
                self.fail_record(&err.to_string());
                if matches!(err, JobError::Timeout { .. }) {
                    self.phase = JobPhase::TimedOut;
                    self.emit(JobEvent::TimedOut);
                } else {
                    self.phase = JobPhase::Failed;
                    self.emit(JobEvent::Failed(err.to_string()));
                }
                Err(err)
            }
        }
    }

    /// Every iteration: checkpoint, sleep, checkpoint, one status request.
    fn poll_until_done(
        &mut self,
        credential: &str,
        status_url: &str,
        result_url: &str,
    ) -> Result<Vec<OutputImage>, JobError> {
        for attempt in 0..self.config.max_attempts {
            self.checkpoint()?;
            self.sleeper.sleep(self.config.interval);
            self.checkpoint()?;

            let snapshot = self.api.poll_once(credential, status_url)?;
            tracing::debug!(
                attempt = attempt + 1,
                status = ?snapshot.status,
                inline_images = snapshot.images.len(),
                "status check"
            );

            match snapshot.status {
                RemoteStatus::Completed => {
                    let images = if !snapshot.images.is_empty() {
                        snapshot.images
                    } else {
                        match self.api.fetch_result(credential, result_url) {
                            Ok(payload) => payload.images,
                            Err(err) => {
                                tracing::warn!(%err, "result fetch failed, using status payload");
                                snapshot.images
                            }
                        }
                    };
                    if images.is_empty() {
                        return Err(JobError::Failed(NO_IMAGES_MESSAGE.into()));
                    }
                    // cache outputs before the record is marked completed
                    self.persist(OUTPUT_IMAGES_KEY, &images);
                    self.set_status(JobStatus::Completed);
                    return Ok(images);
                }
                RemoteStatus::Failed => {
                    return Err(JobError::Failed(
                        snapshot
                            .error
                            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.into()),
                    ));
                }
                RemoteStatus::Queued | RemoteStatus::InProgress | RemoteStatus::Unknown => {
                    if let Some(line) = snapshot.logs.last() {
                        self.emit(JobEvent::Progress(line.clone()));
                    }
                }
            }
        }

        Err(JobError::Timeout {
            attempts: self.config.max_attempts,
        })
    }

    fn checkpoint(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    fn set_status(&mut self, status: JobStatus) {
        if let Some(record) = self.current.as_mut() {
            record.status = status;
        }
        self.persist_record();
    }

    fn fail_record(&mut self, message: &str) {
        if let Some(record) = self.current.as_mut() {
            record.mark_failed(message, Utc::now());
        }
        self.persist_record();
    }

    fn clear_record(&mut self) {
        self.current = None;
        self.store.remove(JOB_RECORD_KEY);
    }

    fn persist_record(&mut self) {
        if let Some(record) = self.current.clone() {
            self.persist(JOB_RECORD_KEY, &record);
        }
    }

    /// Storage failures only degrade history and resume; the user is told
    /// once per session.
    fn persist<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> bool {
        match save_json(&mut self.store, key, value) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, "could not persist generation data");
                if !self.storage_warned {
                    self.storage_warned = true;
                    self.emit(JobEvent::Warning(STORAGE_FULL_WARNING.into()));
                }
                false
            }
        }
    }

    fn emit(&self, event: JobEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
