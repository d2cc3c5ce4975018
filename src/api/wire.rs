//! Response decoding. Every body the API can return is normalized here so the
//! rest of the crate only sees [`SubmittedJob`], [`StatusSnapshot`] and
//! [`ResultPayload`].

use super::{OutputImage, RemoteStatus, ResultPayload, StatusSnapshot, SubmittedJob};
use crate::error::JobError;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct SubmitWire {
    request_id: String,
    #[serde(default)]
    status_url: Option<String>,
    #[serde(default)]
    response_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImagesWire {
    images: Vec<OutputImage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResultWire {
    Nested { data: ImagesWire },
    Flat(ImagesWire),
    Bare(Vec<OutputImage>),
}

#[derive(Debug, Deserialize)]
struct LogWire {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusWire {
    status: RemoteStatus,
    #[serde(default)]
    images: Option<Vec<OutputImage>>,
    #[serde(default)]
    logs: Option<Vec<LogWire>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorWire {
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Two-stage upload initiation; the CDN has used both naming styles.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct InitiateWire {
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default, rename = "uploadUrl")]
    upload_url_camel: Option<String>,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default, rename = "fileUrl")]
    file_url_camel: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl InitiateWire {
    pub(crate) fn upload_url(&self) -> Option<&str> {
        non_empty(&self.upload_url).or(non_empty(&self.upload_url_camel))
    }

    pub(crate) fn file_url(&self) -> Option<&str> {
        non_empty(&self.file_url)
            .or(non_empty(&self.file_url_camel))
            .or(non_empty(&self.url))
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LegacyUploadWire {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default, rename = "fileUrl")]
    file_url_camel: Option<String>,
}

impl LegacyUploadWire {
    pub(crate) fn url(&self) -> Option<&str> {
        non_empty(&self.url)
            .or(non_empty(&self.file_url))
            .or(non_empty(&self.file_url_camel))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn decode_submit(body: &[u8], base_url: &str) -> Result<SubmittedJob, JobError> {
    let wire: SubmitWire =
        serde_json::from_slice(body).map_err(|err| JobError::Decode(format!("submit: {err}")))?;
    let base = base_url.trim_end_matches('/');
    let status_url = wire
        .status_url
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| format!("{base}/requests/{}/status", wire.request_id));
    let result_url = wire
        .response_url
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| format!("{base}/requests/{}", wire.request_id));
    Ok(SubmittedJob {
        request_id: wire.request_id,
        status_url,
        result_url,
    })
}

pub fn decode_status(body: &[u8]) -> Result<StatusSnapshot, JobError> {
    let wire: StatusWire =
        serde_json::from_slice(body).map_err(|err| JobError::Decode(format!("status: {err}")))?;
    Ok(StatusSnapshot {
        status: wire.status,
        images: wire.images.unwrap_or_default(),
        logs: wire
            .logs
            .unwrap_or_default()
            .into_iter()
            .filter_map(|line| line.message)
            .collect(),
        error: wire.error.as_ref().and_then(value_text),
    })
}

pub fn decode_result(body: &[u8]) -> Result<ResultPayload, JobError> {
    let wire: ResultWire =
        serde_json::from_slice(body).map_err(|err| JobError::Decode(format!("result: {err}")))?;
    let images = match wire {
        ResultWire::Nested { data } => data.images,
        ResultWire::Flat(flat) => flat.images,
        ResultWire::Bare(images) => images,
    };
    Ok(ResultPayload { images })
}

/// Best human-readable message in an error body, if any.
pub fn error_message(body: &[u8]) -> Option<String> {
    let wire: ErrorWire = serde_json::from_slice(body).unwrap_or_default();
    [wire.detail, wire.message, wire.error]
        .iter()
        .flatten()
        .find_map(value_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_fills_missing_urls_from_base() {
        let job = decode_submit(br#"{"request_id":"abc"}"#, "https://queue/app/").unwrap();
        assert_eq!(job.status_url, "https://queue/app/requests/abc/status");
        assert_eq!(job.result_url, "https://queue/app/requests/abc");

        let job = decode_submit(
            br#"{"request_id":"abc","status_url":"https://s","response_url":"https://r"}"#,
            "https://queue/app",
        )
        .unwrap();
        assert_eq!(job.status_url, "https://s");
        assert_eq!(job.result_url, "https://r");
    }

    #[test]
    fn result_shapes_normalize_to_one_payload() {
        let flat = decode_result(br#"{"images":[{"url":"a"}]}"#).unwrap();
        let nested = decode_result(br#"{"data":{"images":[{"url":"a"}]}}"#).unwrap();
        let bare = decode_result(br#"[{"url":"a"}]"#).unwrap();
        assert_eq!(flat, nested);
        assert_eq!(flat, bare);
        assert_eq!(flat.images[0].url, "a");
    }

    #[test]
    fn unknown_result_shape_is_a_decode_error() {
        let err = decode_result(br#"{"files":[]}"#).unwrap_err();
        assert!(matches!(err, JobError::Decode(_)));
    }

    #[test]
    fn status_collects_log_messages_and_error_text() {
        let snapshot = decode_status(
            br#"{"status":"FAILED","logs":[{"message":"step 1"},{"timestamp":"t"}],"error":"nsfw"}"#,
        )
        .unwrap();
        assert_eq!(snapshot.status, RemoteStatus::Failed);
        assert_eq!(snapshot.logs, vec!["step 1".to_string()]);
        assert_eq!(snapshot.error.as_deref(), Some("nsfw"));

        let snapshot = decode_status(br#"{"status":"IN_PROGRESS","images":null}"#).unwrap();
        assert_eq!(snapshot.status, RemoteStatus::InProgress);
        assert!(snapshot.images.is_empty());
    }

    #[test]
    fn error_message_prefers_detail() {
        assert_eq!(
            error_message(br#"{"detail":"bad key","message":"other"}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            error_message(br#"{"detail":[{"msg":"x"}]}"#).as_deref(),
            Some(r#"[{"msg":"x"}]"#)
        );
        assert_eq!(error_message(b"<html>"), None);
    }

    #[test]
    fn initiate_accepts_both_naming_styles() {
        let wire: InitiateWire =
            serde_json::from_str(r#"{"uploadUrl":"https://put","url":"https://file"}"#).unwrap();
        assert_eq!(wire.upload_url(), Some("https://put"));
        assert_eq!(wire.file_url(), Some("https://file"));
    }
}
