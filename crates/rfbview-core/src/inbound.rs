//! Server-to-client message parsing
//!
//! Pixel data travels over the video path, so framebuffer updates may only
//! carry pseudo-encoding rectangles. Parsing never consumes a partial
//! message: incomplete input stays in the buffer until more bytes arrive.

use crate::protocol::encoding;
use crate::{Error, Result};
use bytes::{Buf, BytesMut};

/// Message type bytes for server-to-client messages
pub mod msg_type {
    pub const FRAMEBUFFER_UPDATE: u8 = 0;
    pub const SET_COLOUR_MAP_ENTRIES: u8 = 1;
    pub const BELL: u8 = 2;
    pub const SERVER_CUT_TEXT: u8 = 3;
}

/// Pseudo-encoding rectangle inside a framebuffer update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoRect {
    /// Server accepts QEMU extended key events
    ExtendedKeyEvent,
    DesktopName(String),
    DesktopSize { width: u16, height: u16 },
}

/// A parsed server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    FramebufferUpdate(Vec<PseudoRect>),
    SetColourMapEntries,
    Bell,
    ServerCutText(String),
}

/// Cursor over a byte slice that reports missing input as `None`
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.bytes(1).map(|b| b[0])
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.bytes(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.bytes(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.u32().map(|v| v as i32)
    }
}

/// Decode Latin-1 bytes
pub fn latin1_to_string(data: &[u8]) -> String {
    data.iter().map(|&b| char::from(b)).collect()
}

/// Parse the next complete message, advancing `buf` past it.
///
/// Returns `Ok(None)` when `buf` holds only part of a message.
pub fn parse(buf: &mut BytesMut) -> Result<Option<ServerMessage>> {
    let mut reader = Reader::new(&buf[..]);
    let message = match parse_message(&mut reader)? {
        Some(message) => message,
        None => return Ok(None),
    };
    let consumed = reader.consumed();
    buf.advance(consumed);
    Ok(Some(message))
}

fn parse_message(r: &mut Reader<'_>) -> Result<Option<ServerMessage>> {
    let Some(kind) = r.u8() else {
        return Ok(None);
    };

    match kind {
        msg_type::FRAMEBUFFER_UPDATE => parse_framebuffer_update(r),
        msg_type::SET_COLOUR_MAP_ENTRIES => {
            let Some(_padding) = r.u8() else { return Ok(None) };
            let Some(_first) = r.u16() else { return Ok(None) };
            let Some(count) = r.u16() else { return Ok(None) };
            if r.bytes(usize::from(count) * 6).is_none() {
                return Ok(None);
            }
            Ok(Some(ServerMessage::SetColourMapEntries))
        }
        msg_type::BELL => Ok(Some(ServerMessage::Bell)),
        msg_type::SERVER_CUT_TEXT => {
            if r.bytes(3).is_none() {
                return Ok(None);
            }
            let Some(length) = r.i32() else { return Ok(None) };
            if length < 0 {
                return Err(Error::protocol("extended clipboard data was not requested"));
            }
            let Some(text) = r.bytes(length as usize) else {
                return Ok(None);
            };
            Ok(Some(ServerMessage::ServerCutText(latin1_to_string(text))))
        }
        other => Err(Error::protocol(format!(
            "Unexpected server message (type {})",
            other
        ))),
    }
}

fn parse_framebuffer_update(r: &mut Reader<'_>) -> Result<Option<ServerMessage>> {
    let Some(_padding) = r.u8() else { return Ok(None) };
    let Some(count) = r.u16() else { return Ok(None) };

    let mut rects = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let Some(_x) = r.u16() else { return Ok(None) };
        let Some(_y) = r.u16() else { return Ok(None) };
        let Some(width) = r.u16() else { return Ok(None) };
        let Some(height) = r.u16() else { return Ok(None) };
        let Some(enc) = r.i32() else { return Ok(None) };

        let rect = match enc {
            encoding::QEMU_EXTENDED_KEY_EVENT => PseudoRect::ExtendedKeyEvent,
            encoding::DESKTOP_SIZE => PseudoRect::DesktopSize { width, height },
            encoding::DESKTOP_NAME => {
                let Some(length) = r.u32() else { return Ok(None) };
                let Some(name) = r.bytes(length as usize) else {
                    return Ok(None);
                };
                PseudoRect::DesktopName(String::from_utf8_lossy(name).into_owned())
            }
            other => {
                return Err(Error::protocol(format!(
                    "Unsupported encoding {} in framebuffer update",
                    other
                )))
            }
        };
        rects.push(rect);
    }

    Ok(Some(ServerMessage::FramebufferUpdate(rects)))
}
