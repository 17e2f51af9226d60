//! Rendering surface contract

use crate::viewport::Viewport;
use rfbview_core::CursorImage;
use tracing::debug;

/// Receiver of geometry and cursor updates.
///
/// Every method defaults to doing nothing, so a surface only implements
/// what it renders.
pub trait Surface {
    fn viewport_changed(&mut self, _viewport: Viewport) {}

    fn scale_changed(&mut self, _scale: f64) {}

    /// Encoded scale for the video "resize" channel, `None` when degenerate
    fn scale_hint(&mut self, _hint: Option<[u8; 4]>) {}

    fn cursor_changed(&mut self, _cursor: &CursorImage) {}

    /// Locally drawn cursor position (touch input)
    fn cursor_moved(&mut self, _x: f64, _y: f64) {}

    fn background_changed(&mut self, _background: &str) {}

    fn focus(&mut self) {}
}

/// Surface that only logs what it is told
#[derive(Debug, Default)]
pub struct LoggingSurface;

impl Surface for LoggingSurface {
    fn viewport_changed(&mut self, viewport: Viewport) {
        debug!(
            "Viewport {}x{} at ({}, {})",
            viewport.w, viewport.h, viewport.x, viewport.y
        );
    }

    fn scale_changed(&mut self, scale: f64) {
        debug!("Scale {:.3}", scale);
    }

    fn cursor_changed(&mut self, cursor: &CursorImage) {
        debug!(
            "Cursor {}x{} hotspot ({}, {})",
            cursor.width, cursor.height, cursor.hotspot_x, cursor.hotspot_y
        );
    }

    fn background_changed(&mut self, background: &str) {
        debug!("Background {}", background);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum SurfaceUpdate {
        Viewport(Viewport),
        Scale(f64),
        ScaleHint(Option<[u8; 4]>),
        Cursor(CursorImage),
        CursorMoved(f64, f64),
        Background(String),
        Focus,
    }

    /// Surface double that records every update
    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub updates: Vec<SurfaceUpdate>,
    }

    impl RecordingSurface {
        pub fn cursors(&self) -> Vec<CursorImage> {
            self.updates
                .iter()
                .filter_map(|u| match u {
                    SurfaceUpdate::Cursor(c) => Some(c.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn last_viewport(&self) -> Option<Viewport> {
            self.updates.iter().rev().find_map(|u| match u {
                SurfaceUpdate::Viewport(vp) => Some(*vp),
                _ => None,
            })
        }

        pub fn last_scale(&self) -> Option<f64> {
            self.updates.iter().rev().find_map(|u| match u {
                SurfaceUpdate::Scale(s) => Some(*s),
                _ => None,
            })
        }
    }

    impl Surface for RecordingSurface {
        fn viewport_changed(&mut self, viewport: Viewport) {
            self.updates.push(SurfaceUpdate::Viewport(viewport));
        }

        fn scale_changed(&mut self, scale: f64) {
            self.updates.push(SurfaceUpdate::Scale(scale));
        }

        fn scale_hint(&mut self, hint: Option<[u8; 4]>) {
            self.updates.push(SurfaceUpdate::ScaleHint(hint));
        }

        fn cursor_changed(&mut self, cursor: &CursorImage) {
            self.updates.push(SurfaceUpdate::Cursor(cursor.clone()));
        }

        fn cursor_moved(&mut self, x: f64, y: f64) {
            self.updates.push(SurfaceUpdate::CursorMoved(x, y));
        }

        fn background_changed(&mut self, background: &str) {
            self.updates.push(SurfaceUpdate::Background(background.to_string()));
        }

        fn focus(&mut self) {
            self.updates.push(SurfaceUpdate::Focus);
        }
    }
}
