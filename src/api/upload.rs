//! Reference-image upload with an ordered fallback chain.
//!
//! The CDN has changed its accepted protocol between deployments, so the
//! client walks a fixed list: three two-stage initiate-then-PUT variants,
//! then four legacy multipart endpoints. Attempts are strictly sequential so
//! at most one upload can succeed.

use super::wire::{InitiateWire, LegacyUploadWire};
use crate::error::JobError;
use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

pub const DEFAULT_INITIATE_BASE: &str = "https://rest.alpha.fal.ai/storage/upload";

pub const DEFAULT_LEGACY_ENDPOINTS: [&str; 4] = [
    "https://api.fal.ai/v1/storage/upload",
    "https://api.fal.run/v1/storage/upload",
    "https://fal.run/api/v1/storage/upload",
    "https://fal.ai/api/v1/storage/upload",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEndpoints {
    pub initiate: Vec<String>,
    pub legacy: Vec<String>,
}

impl UploadEndpoints {
    /// Standard initiate variants (`fal-cdn-v3`, `fal-cdn`, untyped) under
    /// `initiate_base`, followed by the given legacy endpoints.
    pub fn from_bases(initiate_base: &str, legacy: Vec<String>) -> Self {
        let base = initiate_base.trim_end_matches('/');
        Self {
            initiate: vec![
                format!("{base}/initiate?storage_type=fal-cdn-v3"),
                format!("{base}/initiate?storage_type=fal-cdn"),
                format!("{base}/initiate"),
            ],
            legacy,
        }
    }
}

impl Default for UploadEndpoints {
    fn default() -> Self {
        Self::from_bases(
            DEFAULT_INITIATE_BASE,
            DEFAULT_LEGACY_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

#[derive(Serialize)]
struct InitiateBody<'a> {
    content_type: &'a str,
    file_name: &'a str,
}

pub(crate) fn upload_with_fallback(
    client: &Client,
    endpoints: &UploadEndpoints,
    credential: &str,
    bytes: &[u8],
    mime_type: &str,
    filename: &str,
) -> Result<String, JobError> {
    for endpoint in &endpoints.initiate {
        match try_initiate(client, endpoint, credential, bytes, mime_type, filename) {
            Ok(url) => {
                tracing::info!(endpoint = %endpoint, filename, "uploaded reference image");
                return Ok(url);
            }
            Err(err) => {
                tracing::warn!(endpoint = %endpoint, error = %format!("{err:#}"), "initiate upload failed")
            }
        }
    }

    for endpoint in &endpoints.legacy {
        match try_legacy(client, endpoint, credential, bytes, mime_type, filename) {
            Ok(url) => {
                tracing::info!(endpoint = %endpoint, filename, "uploaded reference image (legacy form)");
                return Ok(url);
            }
            Err(err) => {
                tracing::warn!(endpoint = %endpoint, error = %format!("{err:#}"), "form upload failed")
            }
        }
    }

    Err(JobError::Upload("all upload attempts failed".into()))
}

fn try_initiate(
    client: &Client,
    endpoint: &str,
    credential: &str,
    bytes: &[u8],
    mime_type: &str,
    filename: &str,
) -> Result<String> {
    let resp = client
        .post(endpoint)
        .header(AUTHORIZATION, format!("Key {credential}"))
        .header(ACCEPT, "application/json")
        .json(&InitiateBody {
            content_type: mime_type,
            file_name: filename,
        })
        .send()
        .context("send initiate request")?;
    if !resp.status().is_success() {
        bail!("initiate status {}", resp.status());
    }
    let wire: InitiateWire = resp.json().context("decode initiate response")?;
    let upload_url = wire
        .upload_url()
        .ok_or_else(|| anyhow!("initiate response has no upload url"))?;
    let file_url = wire
        .file_url()
        .ok_or_else(|| anyhow!("initiate response has no file url"))?;

    let put = client
        .put(upload_url)
        .header(CONTENT_TYPE, mime_type)
        .body(bytes.to_vec())
        .send()
        .context("send upload body")?;
    if !put.status().is_success() {
        bail!("upload status {}", put.status());
    }
    Ok(file_url.to_string())
}

fn try_legacy(
    client: &Client,
    endpoint: &str,
    credential: &str,
    bytes: &[u8],
    mime_type: &str,
    filename: &str,
) -> Result<String> {
    let part = Part::bytes(bytes.to_vec())
        .file_name(filename.to_string())
        .mime_str(mime_type)
        .context("build file part")?;
    let form = Form::new()
        .part("file", part)
        .text("content_type", mime_type.to_string())
        .text("filename", filename.to_string());

    let resp = client
        .post(endpoint)
        .header(AUTHORIZATION, format!("Key {credential}"))
        .multipart(form)
        .send()
        .context("send form upload")?;
    if !resp.status().is_success() {
        bail!("form upload status {}", resp.status());
    }
    let wire: LegacyUploadWire = resp.json().context("decode form upload response")?;
    wire.url()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("form upload response has no url"))
}

#[cfg(test)]
mod tests {
    use super::UploadEndpoints;

    #[test]
    fn default_chain_has_three_initiate_and_four_legacy_endpoints() {
        let endpoints = UploadEndpoints::default();
        assert_eq!(endpoints.initiate.len(), 3);
        assert!(endpoints.initiate[0].ends_with("initiate?storage_type=fal-cdn-v3"));
        assert!(endpoints.initiate[1].ends_with("initiate?storage_type=fal-cdn"));
        assert!(endpoints.initiate[2].ends_with("/initiate"));
        assert_eq!(endpoints.legacy.len(), 4);
    }
}
