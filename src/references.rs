//! Reference images attached to edit requests, kept as data URLs so they
//! survive restarts without any raw binary in the store.

use crate::store::{load_json, save_json, KeyValueStore, SaveError, REFERENCE_IMAGES_KEY};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MAX_REFERENCE_IMAGES: usize = 5;

static DATA_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:([^;,]+);base64,(.+)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Decode a base64 `data:` URL. Anything else (plain URLs, percent-encoded
/// data URLs, bad base64) yields `None`.
pub fn parse_data_url(url: &str) -> Option<DataUrl> {
    let caps = DATA_URL_RE.captures(url)?;
    let bytes = STANDARD.decode(caps[2].trim()).ok()?;
    Some(DataUrl {
        mime_type: caps[1].to_string(),
        bytes,
    })
}

pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

/// Mime type of an image, sniffed from its bytes.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::WebP => Some("image/webp"),
        image::ImageFormat::Gif => Some("image/gif"),
        image::ImageFormat::Bmp => Some("image/bmp"),
        _ => None,
    }
}

/// Read an image file into a data URL. Non-image files are rejected.
pub fn read_file_as_data_url(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let Some(mime) = sniff_image_mime(&bytes) else {
        bail!("{} is not a supported image", path.display());
    };
    Ok(to_data_url(mime, &bytes))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImage {
    pub data_url: String,
    pub file_name: String,
}

impl ReferenceImage {
    pub fn new(data_url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            data_url: data_url.into(),
            file_name: file_name.into(),
        }
    }
}

/// Ordered set of at most [`MAX_REFERENCE_IMAGES`] images.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferenceSet {
    images: Vec<ReferenceImage>,
}

impl ReferenceSet {
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Self {
        let mut images: Vec<ReferenceImage> =
            load_json(store, REFERENCE_IMAGES_KEY).unwrap_or_default();
        images.retain(|img| !img.data_url.is_empty());
        images.truncate(MAX_REFERENCE_IMAGES);
        Self { images }
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &mut S) -> Result<(), SaveError> {
        save_json(store, REFERENCE_IMAGES_KEY, &self.images)
    }

    pub fn images(&self) -> &[ReferenceImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn remaining_slots(&self) -> usize {
        MAX_REFERENCE_IMAGES.saturating_sub(self.images.len())
    }

    /// Returns false when the set is already full.
    pub fn push(&mut self, image: ReferenceImage) -> bool {
        if self.remaining_slots() == 0 {
            return false;
        }
        self.images.push(image);
        true
    }

    /// Add files up to the remaining capacity. Extra files are ignored and
    /// non-image files are skipped. Returns how many were added.
    pub fn add_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> usize {
        let mut added = 0;
        for path in paths.iter().take(self.remaining_slots()) {
            let path = path.as_ref();
            match read_file_as_data_url(path) {
                Ok(data_url) => {
                    let file_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| "image.jpg".into());
                    self.images.push(ReferenceImage::new(data_url, file_name));
                    added += 1;
                }
                Err(err) => tracing::warn!(error = %format!("{err:#}"), "skipping reference file"),
            }
        }
        added
    }

    pub fn remove(&mut self, index: usize) -> Option<ReferenceImage> {
        (index < self.images.len()).then(|| self.images.remove(index))
    }

    pub fn clear(&mut self) {
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn data_url_roundtrip_and_rejections() {
        let url = to_data_url("image/png", &[1, 2, 3]);
        assert_eq!(
            parse_data_url(&url),
            Some(DataUrl {
                mime_type: "image/png".into(),
                bytes: vec![1, 2, 3]
            })
        );
        assert_eq!(parse_data_url("https://cdn/x.png"), None);
        assert_eq!(parse_data_url("data:image/png,raw"), None);
        assert_eq!(parse_data_url("data:image/png;base64,***"), None);
    }

    #[test]
    fn set_is_capped_at_five() {
        let mut set = ReferenceSet::default();
        for i in 0..MAX_REFERENCE_IMAGES {
            assert!(set.push(ReferenceImage::new(format!("data:x;base64,{i}"), "a.png")));
        }
        assert!(!set.push(ReferenceImage::new("data:x;base64,AA==", "b.png")));
        assert_eq!(set.remaining_slots(), 0);
    }

    #[test]
    fn add_files_skips_non_images_and_respects_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("one.png");
        image::RgbaImage::new(2, 2).save(&png).unwrap();
        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, "hello").unwrap();

        let mut set = ReferenceSet::default();
        for _ in 0..3 {
            set.push(ReferenceImage::new("data:image/png;base64,AA==", "x.png"));
        }
        let added = set.add_files(&[txt, png.clone(), png.clone(), png]);
        // two slots left: the text file is skipped, the next file fills one slot
        assert_eq!(added, 1);
        assert_eq!(set.images()[3].file_name, "one.png");
        assert!(set.images()[3].data_url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn persisted_set_reloads() {
        let mut store = MemoryStore::new();
        let mut set = ReferenceSet::default();
        set.push(ReferenceImage::new("data:image/png;base64,AA==", "a.png"));
        set.save(&mut store).unwrap();
        assert_eq!(ReferenceSet::load(&store), set);
    }
}
