//! Cursor selection with the dot fallback

use rfbview_core::CursorImage;

/// Holds the server cursor and decides what should be shown
#[derive(Debug, Default)]
pub struct CursorManager {
    image: CursorImage,
    show_dot: bool,
}

impl CursorManager {
    pub fn new(show_dot: bool) -> Self {
        Self {
            image: CursorImage::none(),
            show_dot,
        }
    }

    /// Cursor last received from the server
    pub fn image(&self) -> &CursorImage {
        &self.image
    }

    pub fn set_image(&mut self, image: CursorImage) {
        self.image = image;
    }

    pub fn show_dot(&self) -> bool {
        self.show_dot
    }

    pub fn set_show_dot(&mut self, show_dot: bool) {
        self.show_dot = show_dot;
    }

    /// True when the dot replaces an invisible server cursor
    pub fn should_show_dot(&self) -> bool {
        self.show_dot && self.image.is_fully_transparent()
    }

    /// Image to hand to the cursor renderer
    pub fn effective(&self) -> CursorImage {
        if self.should_show_dot() {
            CursorImage::dot()
        } else {
            self.image.clone()
        }
    }
}
