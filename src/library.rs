//! Locally kept images that can be reused as references later.

use crate::references::{to_data_url, ReferenceImage, ReferenceSet};
use crate::store::{load_json, save_json, KeyValueStore, SaveError, LIBRARY_IMAGES_KEY};
use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MAX_LIBRARY_IMAGES: usize = 20;
pub const MAX_IMAGE_SIZE_KB: u64 = 500;

const START_QUALITY: u8 = 90;
const MIN_QUALITY: u8 = 50;
const QUALITY_STEP: u8 = 10;
const SHRINK_FACTOR: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryImage {
    pub id: String,
    pub data_url: String,
    #[serde(rename = "sizeKB")]
    pub size_kb: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub size_kb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryError {
    Full,
    NotFound(usize),
    ReferencesFull,
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Full => {
                write!(f, "the image library holds at most {MAX_LIBRARY_IMAGES} images")
            }
            LibraryError::NotFound(index) => write!(f, "no library image at index {index}"),
            LibraryError::ReferencesFull => write!(f, "reference image slots are full"),
        }
    }
}

impl std::error::Error for LibraryError {}

fn size_in_kb(len: usize) -> u64 {
    (len as f64 / 1024.0).round() as u64
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(out)
}

/// Re-encode as JPEG until the result fits in `max_kb`.
///
/// Quality steps down from 90 to 50; once at 50 the dimensions shrink by 10%
/// and quality starts over. Gives up at a 1x1 image.
pub fn compress_image(source: &DynamicImage, max_kb: u64) -> Result<CompressedImage> {
    let original = source.to_rgb8();
    let (mut width, mut height) = original.dimensions();
    let mut current = original.clone();
    let mut quality = START_QUALITY;

    loop {
        let bytes = encode_jpeg(&current, quality)?;
        let size_kb = size_in_kb(bytes.len());
        let can_shrink = width > 1 || height > 1;
        if size_kb <= max_kb || (quality <= MIN_QUALITY && !can_shrink) {
            return Ok(CompressedImage {
                bytes,
                width,
                height,
                size_kb,
            });
        }

        if quality > MIN_QUALITY {
            quality -= QUALITY_STEP;
        } else {
            width = ((width as f64 * SHRINK_FACTOR).floor() as u32).max(1);
            height = ((height as f64 * SHRINK_FACTOR).floor() as u32).max(1);
            current = image::imageops::resize(&original, width, height, FilterType::Triangle);
            quality = START_QUALITY;
            tracing::debug!(width, height, "shrinking library image");
        }
    }
}

fn new_id() -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}-{suffix:08x}", chrono::Utc::now().timestamp_millis())
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageLibrary {
    images: Vec<LibraryImage>,
}

impl ImageLibrary {
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Self {
        Self {
            images: load_json(store, LIBRARY_IMAGES_KEY).unwrap_or_default(),
        }
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &mut S) -> Result<(), SaveError> {
        save_json(store, LIBRARY_IMAGES_KEY, &self.images)
    }

    pub fn images(&self) -> &[LibraryImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.images.len() >= MAX_LIBRARY_IMAGES
    }

    pub fn add_image(&mut self, image: &DynamicImage) -> Result<&LibraryImage> {
        if self.is_full() {
            return Err(LibraryError::Full.into());
        }
        let compressed = compress_image(image, MAX_IMAGE_SIZE_KB)?;
        tracing::info!(
            size_kb = compressed.size_kb,
            width = compressed.width,
            height = compressed.height,
            "added image to library"
        );
        self.images.push(LibraryImage {
            id: new_id(),
            data_url: to_data_url("image/jpeg", &compressed.bytes),
            size_kb: compressed.size_kb,
            width: compressed.width,
            height: compressed.height,
        });
        Ok(&self.images[self.images.len() - 1])
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) -> Result<&LibraryImage> {
        let image = image::load_from_memory(bytes).context("decode library image")?;
        self.add_image(&image)
    }

    pub fn add_file(&mut self, path: &Path) -> Result<&LibraryImage> {
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        self.add_bytes(&bytes)
            .with_context(|| format!("add {} to library", path.display()))
    }

    pub fn remove(&mut self, index: usize) -> Result<LibraryImage, LibraryError> {
        if index >= self.images.len() {
            return Err(LibraryError::NotFound(index));
        }
        Ok(self.images.remove(index))
    }

    /// Copy a library entry into the reference set.
    pub fn promote_to_reference(
        &self,
        index: usize,
        references: &mut ReferenceSet,
    ) -> Result<(), LibraryError> {
        let entry = self.images.get(index).ok_or(LibraryError::NotFound(index))?;
        let reference = ReferenceImage::new(entry.data_url.clone(), format!("library-{index}.jpg"));
        if !references.push(reference) {
            return Err(LibraryError::ReferencesFull);
        }
        Ok(())
    }
}
