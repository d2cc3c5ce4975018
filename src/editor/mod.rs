//! Rotatable rectangle annotations over a bitmap, exported at the bitmap's
//! native resolution.

mod export;
mod frame;
mod source;

pub use export::{
    build_filename, composite_frames, encode, timestamped_stem, ExportFormat, ExportedImage,
    FRAME_FILL,
};
pub use frame::{
    AnnotationFrame, Handle, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH, HANDLE_SIZE,
    MIN_FRAME_SIZE, ROTATE_HANDLE_OFFSET,
};
pub use source::load_bitmap;

use anyhow::Result;
use chrono::Local;
use image::{DynamicImage, RgbaImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorError {
    NotOpen,
}

impl std::fmt::Display for EditorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditorError::NotOpen => write!(f, "no image is open in the editor"),
        }
    }
}

impl std::error::Error for EditorError {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Idle,
    Dragging { last: (f64, f64) },
    Resizing { handle: Handle, last: (f64, f64) },
    Rotating,
}

/// Never upscales.
pub fn display_scale(image: (u32, u32), container: (f64, f64)) -> f64 {
    let sx = container.0 / image.0.max(1) as f64;
    let sy = container.1 / image.1.max(1) as f64;
    sx.min(sy).min(1.0)
}

#[derive(Debug, Clone)]
struct OpenImage {
    source: String,
    bitmap: RgbaImage,
    format: ExportFormat,
    scale: f64,
    canvas: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct OverlayEditor {
    image: Option<OpenImage>,
    frames: Vec<AnnotationFrame>,
    gesture: Gesture,
}

impl Default for OverlayEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayEditor {
    pub fn new() -> Self {
        Self {
            image: None,
            frames: Vec::new(),
            gesture: Gesture::Idle,
        }
    }

    pub fn open(&mut self, source: &str, container: (f64, f64)) -> Result<()> {
        let bitmap = load_bitmap(source)?;
        self.open_bitmap(source, bitmap, container);
        Ok(())
    }

    /// Open an already decoded bitmap. `source` only drives the export
    /// format.
    pub fn open_bitmap(&mut self, source: &str, bitmap: DynamicImage, container: (f64, f64)) {
        let bitmap = bitmap.to_rgba8();
        let (width, height) = bitmap.dimensions();
        let scale = display_scale((width, height), container);
        let canvas = (
            ((width as f64 * scale).round() as u32).max(1),
            ((height as f64 * scale).round() as u32).max(1),
        );
        tracing::info!(width, height, scale, "opened image in editor");
        self.image = Some(OpenImage {
            source: source.to_string(),
            bitmap,
            format: ExportFormat::from_source(source),
            scale,
            canvas,
        });
        self.frames.clear();
        self.gesture = Gesture::Idle;
    }

    pub fn close(&mut self) {
        self.image = None;
        self.frames.clear();
        self.gesture = Gesture::Idle;
    }

    pub fn is_open(&self) -> bool {
        self.image.is_some()
    }

    pub fn source(&self) -> Option<&str> {
        self.image.as_ref().map(|img| img.source.as_str())
    }

    pub fn scale(&self) -> Option<f64> {
        self.image.as_ref().map(|img| img.scale)
    }

    pub fn canvas_size(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(|img| img.canvas)
    }

    pub fn frames(&self) -> &[AnnotationFrame] {
        &self.frames
    }

    pub fn gesture(&self) -> Gesture {
        self.gesture
    }

    pub fn selected(&self) -> Option<usize> {
        self.frames.iter().position(|f| f.selected)
    }

    pub fn select(&mut self, index: Option<usize>) {
        for (i, frame) in self.frames.iter_mut().enumerate() {
            frame.selected = Some(i) == index;
        }
    }

    /// Add a default frame centered in the canvas and select it.
    pub fn add_frame(&mut self) -> Result<usize, EditorError> {
        let (cw, ch) = self.canvas_size().ok_or(EditorError::NotOpen)?;
        Ok(self.insert_frame(AnnotationFrame::centered_in(cw as f64, ch as f64)))
    }

    pub fn insert_frame(&mut self, frame: AnnotationFrame) -> usize {
        self.frames.push(frame);
        let index = self.frames.len() - 1;
        self.select(Some(index));
        index
    }

    pub fn delete_selected(&mut self) -> Option<AnnotationFrame> {
        let index = self.selected()?;
        self.gesture = Gesture::Idle;
        Some(self.frames.remove(index))
    }

    pub fn pointer_down(&mut self, x: f64, y: f64) -> Gesture {
        if let Some(index) = self.selected() {
            match self.frames[index].handle_at(x, y) {
                Some(Handle::Rotate) => {
                    self.gesture = Gesture::Rotating;
                    return self.gesture;
                }
                Some(handle) => {
                    self.gesture = Gesture::Resizing {
                        handle,
                        last: (x, y),
                    };
                    return self.gesture;
                }
                None => {}
            }
        }

        // topmost frame wins
        let hit = self.frames.iter().rposition(|f| f.contains(x, y));
        self.select(hit);
        self.gesture = match hit {
            Some(_) => Gesture::Dragging { last: (x, y) },
            None => Gesture::Idle,
        };
        self.gesture
    }

    pub fn pointer_move(&mut self, x: f64, y: f64) {
        let Some(index) = self.selected() else {
            return;
        };
        let frame = &mut self.frames[index];
        match &mut self.gesture {
            Gesture::Idle => {}
            Gesture::Dragging { last } => {
                frame.translate(x - last.0, y - last.1);
                *last = (x, y);
            }
            Gesture::Resizing { handle, last } => {
                frame.resize(*handle, x - last.0, y - last.1);
                *last = (x, y);
            }
            Gesture::Rotating => frame.rotate_towards(x, y),
        }
    }

    pub fn pointer_up(&mut self) {
        self.gesture = Gesture::Idle;
    }

    pub fn export(&self) -> Result<ExportedImage> {
        self.export_at(Local::now())
    }

    /// Composite all frames over the native bitmap and encode it in the
    /// source's format.
    pub fn export_at(&self, now: chrono::DateTime<Local>) -> Result<ExportedImage> {
        let image = self.image.as_ref().ok_or(EditorError::NotOpen)?;
        let (width, height) = image.bitmap.dimensions();
        let scale_x = width as f64 / image.canvas.0 as f64;
        let scale_y = height as f64 / image.canvas.1 as f64;

        let composed = composite_frames(&image.bitmap, &self.frames, scale_x, scale_y);
        let bytes = encode(&composed, image.format)?;
        tracing::debug!(frames = self.frames.len(), bytes = bytes.len(), "exported annotated image");
        Ok(ExportedImage {
            file_name: build_filename(&timestamped_stem(now), image.format),
            format: image.format,
            bytes,
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor(width: u32, height: u32, container: (f64, f64)) -> OverlayEditor {
        let mut editor = OverlayEditor::new();
        editor.open_bitmap(
            "in-memory.png",
            DynamicImage::ImageRgba8(RgbaImage::new(width, height)),
            container,
        );
        editor
    }

    #[test]
    fn scale_never_upscales() {
        assert_eq!(display_scale((100, 100), (800.0, 600.0)), 1.0);
        assert_eq!(display_scale((1000, 500), (500.0, 500.0)), 0.5);
        assert_eq!(display_scale((1000, 2000), (500.0, 500.0)), 0.25);
    }

    #[test]
    fn add_frame_centers_and_selects_only_new_frame() {
        let mut editor = editor(800, 600, (800.0, 600.0));
        editor.add_frame().unwrap();
        let second = editor.add_frame().unwrap();
        assert_eq!(editor.selected(), Some(second));
        assert_eq!(editor.frames().iter().filter(|f| f.selected).count(), 1);
        let frame = editor.frames()[second];
        assert_eq!(frame.center(), (400.0, 300.0));
        assert_eq!((frame.width, frame.height), (DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT));
    }

    #[test]
    fn add_frame_requires_an_open_image() {
        let mut editor = OverlayEditor::new();
        assert_eq!(editor.add_frame(), Err(EditorError::NotOpen));
        assert!(editor.export().is_err());
    }

    #[test]
    fn drag_moves_selected_frame() {
        let mut editor = editor(800, 600, (800.0, 600.0));
        editor.insert_frame(AnnotationFrame::new(100.0, 100.0, 100.0, 100.0));
        editor.select(None);

        assert!(matches!(editor.pointer_down(150.0, 150.0), Gesture::Dragging { .. }));
        assert_eq!(editor.selected(), Some(0));
        editor.pointer_move(160.0, 170.0);
        editor.pointer_move(170.0, 190.0);
        editor.pointer_up();
        assert_eq!((editor.frames()[0].x, editor.frames()[0].y), (120.0, 140.0));
        assert_eq!(editor.gesture(), Gesture::Idle);
    }

    #[test]
    fn corner_and_knob_gestures() {
        let mut editor = editor(800, 600, (800.0, 600.0));
        editor.insert_frame(AnnotationFrame::new(100.0, 100.0, 100.0, 100.0));

        assert!(matches!(
            editor.pointer_down(200.0, 200.0),
            Gesture::Resizing { handle: Handle::Se, .. }
        ));
        editor.pointer_move(230.0, 220.0);
        editor.pointer_up();
        assert_eq!((editor.frames()[0].width, editor.frames()[0].height), (130.0, 120.0));

        let knob_x = editor.frames()[0].center().0;
        assert_eq!(editor.pointer_down(knob_x, 100.0 - ROTATE_HANDLE_OFFSET), Gesture::Rotating);
        editor.pointer_up();
    }

    #[test]
    fn click_outside_clears_selection_and_delete_is_noop() {
        let mut editor = editor(800, 600, (800.0, 600.0));
        editor.insert_frame(AnnotationFrame::new(100.0, 100.0, 50.0, 50.0));
        assert_eq!(editor.pointer_down(600.0, 500.0), Gesture::Idle);
        assert_eq!(editor.selected(), None);
        assert_eq!(editor.delete_selected(), None);
        assert_eq!(editor.frames().len(), 1);
    }

    #[test]
    fn open_resets_frames() {
        let mut editor = editor(800, 600, (400.0, 400.0));
        assert_eq!(editor.canvas_size(), Some((400, 300)));
        editor.add_frame().unwrap();
        editor.open_bitmap("b.jpg", DynamicImage::ImageRgba8(RgbaImage::new(10, 10)), (50.0, 50.0));
        assert!(editor.frames().is_empty());
        editor.close();
        assert!(!editor.is_open());
    }
}
