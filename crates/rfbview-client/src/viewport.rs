//! Framebuffer viewport geometry
//!
//! Tracks which part of the remote framebuffer is visible and at what scale,
//! and maps element-local coordinates back onto the framebuffer.

use serde::Serialize;
use tracing::debug;

/// Visible rectangle of the framebuffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

/// Framebuffer size, viewport rectangle, clipping and scale
#[derive(Debug, Clone)]
pub struct ViewportGeometry {
    fb_width: u32,
    fb_height: u32,
    viewport: Viewport,
    clip: bool,
    scale: f64,
}

impl Default for ViewportGeometry {
    fn default() -> Self {
        Self {
            fb_width: 0,
            fb_height: 0,
            viewport: Viewport::default(),
            clip: false,
            scale: 1.0,
        }
    }
}

impl ViewportGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn framebuffer_size(&self) -> (u32, u32) {
        (self.fb_width, self.fb_height)
    }

    pub fn clip(&self) -> bool {
        self.clip
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    /// Enable or disable clipping and re-apply the size and position limits
    pub fn set_clip(&mut self, clip: bool) {
        self.clip = clip;
        let vp = self.viewport;
        self.change_size(Some((f64::from(vp.w), f64::from(vp.h))));
        self.change_position(0.0, 0.0);
    }

    /// Change the framebuffer size. The viewport is reset to cover it.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.fb_width = width;
        self.fb_height = height;

        self.viewport.w = self.viewport.w.min(width);
        self.viewport.h = self.viewport.h.min(height);

        self.change_size(None);
        self.change_position(0.0, 0.0);
    }

    /// Move the viewport by a delta, keeping it inside the framebuffer.
    ///
    /// Returns false when the clamped delta is zero.
    pub fn change_position(&mut self, dx: f64, dy: f64) -> bool {
        let vp = self.viewport;
        let (x, y) = (i64::from(vp.x), i64::from(vp.y));
        let (w, h) = (i64::from(vp.w), i64::from(vp.h));
        let (fb_width, fb_height) = (i64::from(self.fb_width), i64::from(self.fb_height));

        let (mut dx, mut dy) = (dx.floor() as i64, dy.floor() as i64);

        if !self.clip {
            // Without clipping the viewport is pinned to the origin
            dx = -w;
            dy = -h;
        }

        let vx2 = x + w - 1;
        let vy2 = y + h - 1;

        if dx < 0 && x + dx < 0 {
            dx = -x;
        }
        if vx2 + dx >= fb_width {
            dx -= vx2 + dx - fb_width + 1;
        }

        if y + dy < 0 {
            dy = -y;
        }
        if vy2 + dy >= fb_height {
            dy -= vy2 + dy - fb_height + 1;
        }

        if dx == 0 && dy == 0 {
            return false;
        }

        debug!("Viewport moved by ({}, {})", dx, dy);
        self.viewport.x = (x + dx) as i32;
        self.viewport.y = (y + dy) as i32;
        true
    }

    /// Resize the viewport. Without clipping, or without a size, it covers
    /// the whole framebuffer.
    pub fn change_size(&mut self, size: Option<(f64, f64)>) -> bool {
        let (width, height) = match size {
            Some((width, height)) if self.clip => (
                clamp_dimension(width, self.fb_width),
                clamp_dimension(height, self.fb_height),
            ),
            _ => (self.fb_width, self.fb_height),
        };

        if self.viewport.w == width && self.viewport.h == height {
            return false;
        }

        self.viewport.w = width;
        self.viewport.h = height;
        self.change_position(0.0, 0.0);
        true
    }

    /// Scale that fits the viewport into a container, keeping the aspect ratio
    pub fn autoscale(&mut self, container_width: f64, container_height: f64) {
        let vp = self.viewport;

        self.scale = if container_width == 0.0
            || container_height == 0.0
            || vp.w == 0
            || vp.h == 0
        {
            0.0
        } else {
            let container_aspect = container_width / container_height;
            let viewport_aspect = f64::from(vp.w) / f64::from(vp.h);

            if viewport_aspect >= container_aspect {
                container_width / f64::from(vp.w)
            } else {
                container_height / f64::from(vp.h)
            }
        };
    }

    /// Map element-local coordinates onto the framebuffer.
    ///
    /// A zero scale maps everything to the origin. Results wrap to 32 bits.
    pub fn to_absolute(&self, x: f64, y: f64) -> (i32, i32) {
        if self.scale == 0.0 {
            return (0, 0);
        }
        let abs_x = x / self.scale + f64::from(self.viewport.x);
        let abs_y = y / self.scale + f64::from(self.viewport.y);
        ((abs_x as i64) as i32, (abs_y as i64) as i32)
    }
}

fn clamp_dimension(requested: f64, limit: u32) -> u32 {
    let requested = requested.floor();
    if requested <= 0.0 {
        0
    } else if requested >= f64::from(limit) {
        limit
    } else {
        requested as u32
    }
}
