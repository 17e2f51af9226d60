//! Configuration types for rfbview

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Background shown around the remote desktop
pub const DEFAULT_BACKGROUND: &str = "rgb(40, 40, 40)";

/// Session options recognized by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Options {
    /// Ask the server to keep other clients connected
    pub shared: bool,
    /// UltraVNC repeater identifier (empty for direct connections)
    pub repeater_id: String,
    /// Sub-protocols requested when opening the transport
    pub ws_protocols: Vec<String>,
    /// Suppress all keyboard and pointer output
    pub view_only: bool,
    /// Mouse drags pan the viewport instead of reaching the server
    pub drag_viewport: bool,
    /// Limit the viewport to the container size
    pub clip_viewport: bool,
    /// Scale the viewport to fit the container
    pub scale_viewport: bool,
    /// Ask the server to follow the container size
    pub resize_session: bool,
    /// Show a dot when the server cursor is fully transparent
    pub show_dot_cursor: bool,
    /// Request focus when the display is clicked
    pub focus_on_click: bool,
    /// CSS color around the remote desktop
    pub background: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            shared: true,
            repeater_id: String::new(),
            ws_protocols: Vec::new(),
            view_only: false,
            drag_viewport: false,
            clip_viewport: false,
            scale_viewport: false,
            resize_session: false,
            show_dot_cursor: false,
            focus_on_click: true,
            background: DEFAULT_BACKGROUND.to_string(),
        }
    }
}

impl Options {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from a JSON file; missing keys keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Builder pattern: set shared session flag
    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Builder pattern: set repeater ID
    pub fn with_repeater_id(mut self, id: impl Into<String>) -> Self {
        self.repeater_id = id.into();
        self
    }

    /// Builder pattern: set transport sub-protocols
    pub fn with_ws_protocols(mut self, protocols: Vec<String>) -> Self {
        self.ws_protocols = protocols;
        self
    }

    /// Builder pattern: set view-only mode
    pub fn with_view_only(mut self, view_only: bool) -> Self {
        self.view_only = view_only;
        self
    }

    /// Builder pattern: set drag-viewport mode
    pub fn with_drag_viewport(mut self, drag: bool) -> Self {
        self.drag_viewport = drag;
        self
    }

    /// Builder pattern: set viewport clipping
    pub fn with_clip_viewport(mut self, clip: bool) -> Self {
        self.clip_viewport = clip;
        self
    }

    /// Builder pattern: set viewport scaling
    pub fn with_scale_viewport(mut self, scale: bool) -> Self {
        self.scale_viewport = scale;
        self
    }

    /// Builder pattern: set session resizing
    pub fn with_resize_session(mut self, resize: bool) -> Self {
        self.resize_session = resize;
        self
    }

    /// Builder pattern: set dot cursor fallback
    pub fn with_show_dot_cursor(mut self, show: bool) -> Self {
        self.show_dot_cursor = show;
        self
    }

    /// Builder pattern: set focus-on-click
    pub fn with_focus_on_click(mut self, focus: bool) -> Self {
        self.focus_on_click = focus;
        self
    }

    /// Builder pattern: set background color
    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = background.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = Options::new();
        assert!(options.shared);
        assert!(options.focus_on_click);
        assert!(!options.view_only);
        assert_eq!(options.background, DEFAULT_BACKGROUND);
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"view-only": true, "repeater-id": "1234"}}"#).unwrap();

        let options = Options::from_json_file(file.path()).unwrap();
        assert!(options.view_only);
        assert_eq!(options.repeater_id, "1234");
        assert!(options.shared);
    }

    #[test]
    fn test_from_json_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let result = Options::from_json_file(file.path());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
