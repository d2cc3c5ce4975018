use super::upload::{upload_with_fallback, UploadEndpoints};
use super::wire;
use super::{GenerationParams, JobApi, JobMode, ResultPayload, StatusSnapshot, SubmittedJob};
use crate::error::JobError;
use crate::settings::Settings;
use anyhow::Result;
use reqwest::blocking::{Client, Response};
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct SubmitBody<'a> {
    #[serde(flatten)]
    params: &'a GenerationParams,
    sync_mode: bool,
}

/// Blocking HTTP implementation of [`JobApi`].
pub struct HttpJobClient {
    client: Client,
    base_url: String,
    upload: UploadEndpoints,
}

impl HttpJobClient {
    pub fn new(base_url: impl Into<String>, upload: UploadEndpoints, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("scriptoon job client")
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            upload,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            settings.api_base_url.clone(),
            settings.upload_endpoints(),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, credential: &str, url: &str) -> Result<Response, reqwest::Error> {
        self.client
            .get(url)
            .header(AUTHORIZATION, format!("Key {credential}"))
            .send()
    }
}

fn read_body(resp: Response) -> Result<Vec<u8>, JobError> {
    resp.bytes()
        .map(|b| b.to_vec())
        .map_err(|err| JobError::Transport(format!("read response body: {err}")))
}

impl JobApi for HttpJobClient {
    fn submit(
        &self,
        credential: &str,
        params: &GenerationParams,
        mode: JobMode,
    ) -> Result<SubmittedJob, JobError> {
        let endpoint = mode.endpoint(&self.base_url);
        let resp = self
            .client
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Key {credential}"))
            .json(&SubmitBody {
                params,
                sync_mode: false,
            })
            .send()
            .map_err(|err| JobError::Submission(err.to_string()))?;

        let status = resp.status();
        let body = read_body(resp)?;
        if !status.is_success() {
            let message = wire::error_message(&body)
                .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));
            return Err(JobError::Submission(message));
        }

        let job = wire::decode_submit(&body, &self.base_url)?;
        tracing::info!(
            endpoint = %endpoint,
            request_id = %job.request_id,
            ?mode,
            "generation request submitted"
        );
        Ok(job)
    }

    fn poll_once(&self, credential: &str, status_url: &str) -> Result<StatusSnapshot, JobError> {
        let resp = self
            .get(credential, status_url)
            .map_err(|err| JobError::Transport(format!("Status check failed: {err}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(JobError::Transport(format!(
                "Status check failed: {}",
                status.as_u16()
            )));
        }
        wire::decode_status(&read_body(resp)?)
    }

    fn fetch_result(&self, credential: &str, result_url: &str) -> Result<ResultPayload, JobError> {
        let resp = self
            .get(credential, result_url)
            .map_err(|err| JobError::Transport(format!("Result fetch failed: {err}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(JobError::Transport(format!(
                "Result fetch failed: {}",
                status.as_u16()
            )));
        }
        wire::decode_result(&read_body(resp)?)
    }

    fn upload_reference_image(
        &self,
        credential: &str,
        bytes: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> Result<String, JobError> {
        upload_with_fallback(
            &self.client,
            &self.upload,
            credential,
            bytes,
            mime_type,
            filename,
        )
    }
}
