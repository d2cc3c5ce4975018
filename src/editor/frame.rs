pub const MIN_FRAME_SIZE: f64 = 30.0;
pub const HANDLE_SIZE: f64 = 15.0;
/// Distance of the rotation knob above the top edge.
pub const ROTATE_HANDLE_OFFSET: f64 = 25.0;
pub const DEFAULT_FRAME_WIDTH: f64 = 200.0;
pub const DEFAULT_FRAME_HEIGHT: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Rotate,
    Nw,
    Ne,
    Sw,
    Se,
}

impl Handle {
    pub const CORNERS: [Handle; 4] = [Handle::Nw, Handle::Ne, Handle::Sw, Handle::Se];

    /// Direction of the corner along the frame's local axes.
    fn signs(self) -> Option<(f64, f64)> {
        match self {
            Handle::Nw => Some((-1.0, -1.0)),
            Handle::Ne => Some((1.0, -1.0)),
            Handle::Sw => Some((-1.0, 1.0)),
            Handle::Se => Some((1.0, 1.0)),
            Handle::Rotate => None,
        }
    }
}

/// Rotatable rectangle in display-canvas space.
///
/// `x`/`y` is the top-left corner before rotation; rotation (radians,
/// clockwise on screen) is applied about the center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationFrame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    pub selected: bool,
}

impl AnnotationFrame {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width: width.max(MIN_FRAME_SIZE),
            height: height.max(MIN_FRAME_SIZE),
            rotation: 0.0,
            selected: false,
        }
    }

    pub fn centered_in(canvas_width: f64, canvas_height: f64) -> Self {
        let width = DEFAULT_FRAME_WIDTH.max(MIN_FRAME_SIZE);
        let height = DEFAULT_FRAME_HEIGHT.max(MIN_FRAME_SIZE);
        Self::new(
            (canvas_width - width) / 2.0,
            (canvas_height - height) / 2.0,
            width,
            height,
        )
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// World point into axes centered on the frame and aligned with it.
    pub fn to_local(&self, px: f64, py: f64) -> (f64, f64) {
        let (cx, cy) = self.center();
        let (sin, cos) = self.rotation.sin_cos();
        let (dx, dy) = (px - cx, py - cy);
        (dx * cos + dy * sin, -dx * sin + dy * cos)
    }

    pub fn to_world(&self, lx: f64, ly: f64) -> (f64, f64) {
        let (cx, cy) = self.center();
        let (sin, cos) = self.rotation.sin_cos();
        (cx + lx * cos - ly * sin, cy + lx * sin + ly * cos)
    }

    pub fn corner(&self, handle: Handle) -> Option<(f64, f64)> {
        let (sx, sy) = handle.signs()?;
        Some(self.to_world(sx * self.width / 2.0, sy * self.height / 2.0))
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        let (lx, ly) = self.to_local(px, py);
        lx.abs() <= self.width / 2.0 && ly.abs() <= self.height / 2.0
    }

    /// Handle under the point. Unselected frames expose no handles.
    pub fn handle_at(&self, px: f64, py: f64) -> Option<Handle> {
        if !self.selected {
            return None;
        }
        let (lx, ly) = self.to_local(px, py);
        let half_w = self.width / 2.0;
        let half_h = self.height / 2.0;

        let knob_y = -half_h - ROTATE_HANDLE_OFFSET;
        let on_knob = lx.abs() <= HANDLE_SIZE && (ly - knob_y).abs() <= HANDLE_SIZE;
        let on_stem = lx.abs() <= HANDLE_SIZE / 2.0 && ly >= knob_y && ly <= -half_h;
        if on_knob || on_stem {
            return Some(Handle::Rotate);
        }

        Handle::CORNERS.into_iter().find(|handle| {
            let Some((sx, sy)) = handle.signs() else {
                return false;
            };
            (lx - sx * half_w).abs() <= HANDLE_SIZE && (ly - sy * half_h).abs() <= HANDLE_SIZE
        })
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.x += dx;
        self.y += dy;
    }

    /// Drag a corner by a world-space delta. The opposite corner keeps its
    /// world position; sizes never drop below [`MIN_FRAME_SIZE`].
    pub fn resize(&mut self, handle: Handle, dx: f64, dy: f64) {
        let Some((sx, sy)) = handle.signs() else {
            return;
        };
        let Some(anchor) = self.corner(opposite(handle)) else {
            return;
        };
        let (sin, cos) = self.rotation.sin_cos();
        let local_dx = dx * cos + dy * sin;
        let local_dy = -dx * sin + dy * cos;

        self.width = (self.width + sx * local_dx).max(MIN_FRAME_SIZE);
        self.height = (self.height + sy * local_dy).max(MIN_FRAME_SIZE);

        let hx = sx * self.width / 2.0;
        let hy = sy * self.height / 2.0;
        let cx = anchor.0 + hx * cos - hy * sin;
        let cy = anchor.1 + hx * sin + hy * cos;
        self.x = cx - self.width / 2.0;
        self.y = cy - self.height / 2.0;
    }

    /// Point the rotation knob at the pointer.
    pub fn rotate_towards(&mut self, px: f64, py: f64) {
        let (cx, cy) = self.center();
        self.rotation = (px - cx).atan2(-(py - cy));
    }

    pub fn scaled(&self, scale_x: f64, scale_y: f64) -> Self {
        Self {
            x: self.x * scale_x,
            y: self.y * scale_y,
            width: self.width * scale_x,
            height: self.height * scale_y,
            ..*self
        }
    }
}

fn opposite(handle: Handle) -> Handle {
    match handle {
        Handle::Nw => Handle::Se,
        Handle::Ne => Handle::Sw,
        Handle::Sw => Handle::Ne,
        Handle::Se => Handle::Nw,
        Handle::Rotate => Handle::Rotate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn close(a: (f64, f64), b: (f64, f64)) -> bool {
        (a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9
    }

    #[test]
    fn se_resize_grows_right_and_down() {
        let mut frame = AnnotationFrame::new(10.0, 10.0, 100.0, 50.0);
        frame.resize(Handle::Se, 20.0, 10.0);
        assert_eq!((frame.x, frame.y, frame.width, frame.height), (10.0, 10.0, 120.0, 60.0));
    }

    #[test]
    fn nw_resize_moves_origin() {
        let mut frame = AnnotationFrame::new(10.0, 10.0, 100.0, 50.0);
        frame.resize(Handle::Nw, 20.0, 10.0);
        assert_eq!((frame.x, frame.y, frame.width, frame.height), (30.0, 20.0, 80.0, 40.0));
    }

    #[test]
    fn rotated_resize_keeps_anchor() {
        let mut frame = AnnotationFrame::new(0.0, 0.0, 100.0, 60.0);
        frame.rotation = 0.7;
        let anchor = frame.corner(Handle::Sw).unwrap();
        frame.resize(Handle::Ne, 13.0, -42.0);
        assert!(close(frame.corner(Handle::Sw).unwrap(), anchor));
    }

    #[test]
    fn rotation_follows_pointer() {
        let mut frame = AnnotationFrame::new(0.0, 0.0, 100.0, 100.0);
        frame.rotate_towards(50.0, -100.0);
        assert!(frame.rotation.abs() < 1e-12);
        frame.rotate_towards(200.0, 50.0);
        assert!((frame.rotation - FRAC_PI_2).abs() < 1e-12);
        // knob now sits to the right of the frame
        let knob = frame.to_world(0.0, -50.0 - ROTATE_HANDLE_OFFSET);
        assert!(close(knob, (125.0, 50.0)));
    }

    #[test]
    fn rotated_contains() {
        let mut frame = AnnotationFrame::new(0.0, 40.0, 100.0, 20.0);
        assert!(!frame.contains(50.0, 10.0));
        frame.rotation = FRAC_PI_2;
        assert!(frame.contains(50.0, 10.0));
        assert!(!frame.contains(5.0, 50.0));
    }
}
