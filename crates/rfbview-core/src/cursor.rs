//! Cursor image representation
//!
//! This module provides the cursor bitmap shared by the client session and
//! the cursor side channel.

use std::sync::Arc;

/// Size of the cursor packet header: width, height, hotspot x, hotspot y
const PACKET_HEADER_LEN: usize = 4;

/// RGBA pixels of the fallback dot cursor
const DOT_PIXELS: [u8; 36] = [
    255, 255, 255, 255, 0, 0, 0, 255, 255, 255, 255, 255, //
    0, 0, 0, 255, 0, 0, 0, 0, 0, 0, 0, 255, //
    255, 255, 255, 255, 0, 0, 0, 255, 255, 255, 255, 255,
];

/// A cursor bitmap with its hotspot
#[derive(Clone, PartialEq, Eq)]
pub struct CursorImage {
    /// Raw pixel data in RGBA format
    pixels: Arc<Vec<u8>>,
    /// Cursor width
    pub width: u32,
    /// Cursor height
    pub height: u32,
    /// Hotspot x offset
    pub hotspot_x: u32,
    /// Hotspot y offset
    pub hotspot_y: u32,
}

impl CursorImage {
    /// Create a new cursor from RGBA pixel data
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, hotspot_x: u32, hotspot_y: u32) -> Self {
        Self {
            pixels: Arc::new(pixels),
            width,
            height,
            hotspot_x,
            hotspot_y,
        }
    }

    /// The empty cursor shown until the server sends one
    pub fn none() -> Self {
        Self::new(Vec::new(), 0, 0, 0, 0)
    }

    /// 3x3 dot shown instead of a fully transparent cursor
    pub fn dot() -> Self {
        Self::new(DOT_PIXELS.to_vec(), 3, 3, 1, 1)
    }

    /// Decode a packet from the cursor data channel.
    ///
    /// Layout is `[width, height, hotspot_x, hotspot_y, rgba...]`, one byte
    /// per header field. Returns `None` for a truncated header.
    pub fn from_packet(packet: &[u8]) -> Option<Self> {
        if packet.len() < PACKET_HEADER_LEN {
            return None;
        }
        let (header, pixels) = packet.split_at(PACKET_HEADER_LEN);
        Some(Self::new(
            pixels.to_vec(),
            u32::from(header[0]),
            u32::from(header[1]),
            u32::from(header[2]),
            u32::from(header[3]),
        ))
    }

    /// Get the raw pixel data as a slice
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// True if every alpha byte is zero (an empty image counts as transparent)
    pub fn is_fully_transparent(&self) -> bool {
        self.pixels.iter().skip(3).step_by(4).all(|&alpha| alpha == 0)
    }
}

impl Default for CursorImage {
    fn default() -> Self {
        Self::none()
    }
}

impl std::fmt::Debug for CursorImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("hotspot", &(self.hotspot_x, self.hotspot_y))
            .field("size", &self.pixels.len())
            .finish()
    }
}
