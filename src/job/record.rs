use crate::api::{GenerationParams, JobMode, SubmittedJob};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Polling,
    Completed,
    Failed,
}

/// Durable snapshot of the one in-flight or recently finished job.
///
/// Only a single record exists at a time; a new submission overwrites it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub request_id: String,
    pub status_url: String,
    pub result_url: String,
    pub params: GenerationParams,
    pub mode: JobMode,
    pub status: JobStatus,
    pub displayed_to_user: bool,
    /// Epoch milliseconds.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<i64>,
}

impl JobRecord {
    pub fn new(job: SubmittedJob, params: GenerationParams, mode: JobMode, now: DateTime<Utc>) -> Self {
        Self {
            request_id: job.request_id,
            status_url: job.status_url,
            result_url: job.result_url,
            params,
            mode,
            status: JobStatus::Polling,
            displayed_to_user: false,
            created_at: now.timestamp_millis(),
            error: None,
            failed_at: None,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        Duration::milliseconds(now.timestamp_millis() - self.created_at)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) > ttl
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(message.into());
        self.failed_at = Some(now.timestamp_millis());
    }

    /// Records written before `failed_at` existed count from `created_at`.
    pub fn failure_grace_elapsed(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        let since = self.failed_at.unwrap_or(self.created_at);
        Duration::milliseconds(now.timestamp_millis() - since) >= grace
    }
}
