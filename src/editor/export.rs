use super::frame::AnnotationFrame;
use anyhow::{Context, Result};
use chrono::Local;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub const EXPORT_PREFIX: &str = "scriptoon-edit";
pub const FRAME_FILL: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ExportFormat {
    /// Infer the format from a data URL's mime type or a URL/path extension.
    /// Unknown sources export as PNG.
    pub fn from_source(source: &str) -> Self {
        if let Some(rest) = source.strip_prefix("data:") {
            let mime = rest.split([';', ',']).next().unwrap_or_default();
            return Self::from_token(mime.rsplit('/').next().unwrap_or_default());
        }
        let path = match url::Url::parse(source) {
            Ok(url) => url.path().to_string(),
            _ => source.to_string(),
        };
        let extension = Path::new(&path)
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_token(&extension)
    }

    fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => ExportFormat::Jpeg,
            "webp" => ExportFormat::Webp,
            _ => ExportFormat::Png,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
            ExportFormat::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg => "image/jpeg",
            ExportFormat::Webp => "image/webp",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            ExportFormat::Png => ImageFormat::Png,
            ExportFormat::Jpeg => ImageFormat::Jpeg,
            ExportFormat::Webp => ImageFormat::WebP,
        }
    }
}

pub fn timestamped_stem(now: chrono::DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

pub fn build_filename(stem: &str, format: ExportFormat) -> String {
    format!("{EXPORT_PREFIX}-{stem}.{}", format.extension())
}

/// Copy of `base` with every frame filled, after mapping frames from canvas
/// space into bitmap space.
pub fn composite_frames(
    base: &RgbaImage,
    frames: &[AnnotationFrame],
    scale_x: f64,
    scale_y: f64,
) -> RgbaImage {
    let mut output = base.clone();
    for frame in frames {
        fill_frame(&mut output, &frame.scaled(scale_x, scale_y));
    }
    output
}

/// Fill every pixel whose center lies inside the frame.
fn fill_frame(image: &mut RgbaImage, frame: &AnnotationFrame) {
    let corners = [
        frame.to_world(-frame.width / 2.0, -frame.height / 2.0),
        frame.to_world(frame.width / 2.0, -frame.height / 2.0),
        frame.to_world(-frame.width / 2.0, frame.height / 2.0),
        frame.to_world(frame.width / 2.0, frame.height / 2.0),
    ];
    let min_x = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
    let max_x = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
    let max_y = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil().max(0.0) as u32).min(image.width());
    let y1 = (max_y.ceil().max(0.0) as u32).min(image.height());

    for py in y0..y1 {
        for px in x0..x1 {
            if frame.contains(px as f64 + 0.5, py as f64 + 0.5) {
                image.put_pixel(px, py, FRAME_FILL);
            }
        }
    }
}

pub fn encode(image: &RgbaImage, format: ExportFormat) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    match format {
        ExportFormat::Jpeg => DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .write_to(&mut out, ImageFormat::Jpeg),
        other => image.write_to(&mut out, other.image_format()),
    }
    .with_context(|| format!("encode {}", format.mime_type()))?;
    Ok(out.into_inner())
}

/// Encoded export ready to be saved or handed to a share target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedImage {
    pub file_name: String,
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ExportedImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("create export folder {}", dir.display()))?;
        let path = dir.join(&self.file_name);
        fs::write(&path, &self.bytes).with_context(|| format!("write {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved annotated image");
        Ok(path)
    }
}
