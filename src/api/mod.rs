//! Remote asynchronous job API: request/response types and the [`JobApi`]
//! seam the job session drives.

use crate::error::JobError;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod upload;
pub mod wire;

pub use client::HttpJobClient;
pub use upload::UploadEndpoints;

pub const MAX_IMAGE_COUNT: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[serde(rename = "21:9")]
    Ultrawide,
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "5:4")]
    Landscape5x4,
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "2:3")]
    Portrait2x3,
    #[serde(rename = "9:16")]
    Tall,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 10] = [
        AspectRatio::Ultrawide,
        AspectRatio::Widescreen,
        AspectRatio::Landscape3x2,
        AspectRatio::Landscape4x3,
        AspectRatio::Landscape5x4,
        AspectRatio::Square,
        AspectRatio::Portrait4x5,
        AspectRatio::Portrait3x4,
        AspectRatio::Portrait2x3,
        AspectRatio::Tall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Ultrawide => "21:9",
            AspectRatio::Widescreen => "16:9",
            AspectRatio::Landscape3x2 => "3:2",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Landscape5x4 => "5:4",
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait4x5 => "4:5",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Portrait2x3 => "2:3",
            AspectRatio::Tall => "9:16",
        }
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == s.trim())
            .ok_or_else(|| format!("unknown aspect ratio '{s}'"))
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Resolution {
    #[default]
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::OneK => "1K",
            Resolution::TwoK => "2K",
            Resolution::FourK => "4K",
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1K" => Ok(Resolution::OneK),
            "2K" => Ok(Resolution::TwoK),
            "4K" => Ok(Resolution::FourK),
            _ => Err(format!("unknown resolution '{s}'")),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::Webp),
            _ => Err(format!("unknown output format '{s}'")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request parameters as sent to the API. Field names match the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    #[serde(rename = "num_images")]
    pub count: u8,
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
    pub output_format: OutputFormat,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
}

impl GenerationParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            count: 1,
            aspect_ratio: AspectRatio::default(),
            resolution: Resolution::default(),
            output_format: OutputFormat::default(),
            image_urls: Vec::new(),
        }
    }
}

/// Plain generation or reference-image-conditioned edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    #[default]
    Generate,
    Edit,
}

impl JobMode {
    pub fn endpoint(self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            JobMode::Generate => base.to_string(),
            JobMode::Edit => format!("{base}/edit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub request_id: String,
    pub status_url: String,
    pub result_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OutputImage {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl OutputImage {
    /// Name used when the image is downloaded or shared.
    pub fn download_name(&self, stamp_millis: i64, index: usize) -> String {
        if let Some(name) = self.file_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let ext = match self.content_type.as_deref() {
            Some("image/jpeg") => "jpg",
            Some("image/webp") => "webp",
            _ => "png",
        };
        format!("scriptoon-{stamp_millis}-{index}.{ext}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RemoteStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: RemoteStatus,
    pub images: Vec<OutputImage>,
    pub logs: Vec<String>,
    pub error: Option<String>,
}

impl StatusSnapshot {
    pub fn queued() -> Self {
        Self {
            status: RemoteStatus::Queued,
            images: Vec::new(),
            logs: Vec::new(),
            error: None,
        }
    }
}

/// Canonical result after every accepted response shape has been normalized.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultPayload {
    pub images: Vec<OutputImage>,
}

/// Remote operations the job session depends on.
pub trait JobApi {
    fn submit(
        &self,
        credential: &str,
        params: &GenerationParams,
        mode: JobMode,
    ) -> Result<SubmittedJob, JobError>;

    fn poll_once(&self, credential: &str, status_url: &str) -> Result<StatusSnapshot, JobError>;

    fn fetch_result(&self, credential: &str, result_url: &str) -> Result<ResultPayload, JobError>;

    /// Returns a hosted URL for the image; callers fall back to a data URI
    /// when this fails.
    fn upload_reference_image(
        &self,
        credential: &str,
        bytes: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> Result<String, JobError>;
}
