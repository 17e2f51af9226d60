//! Client-to-server wire messages
//!
//! Every encoder appends a complete message to a [`SendQueue`] and flushes
//! it, so messages reach the transport in the order they were encoded.
//! Multi-byte integers are big-endian.

/// Message type bytes for client-to-server messages
pub mod msg_type {
    pub const SET_ENCODINGS: u8 = 2;
    pub const KEY_EVENT: u8 = 4;
    pub const POINTER_EVENT: u8 = 5;
    pub const CLIENT_CUT_TEXT: u8 = 6;
    pub const QEMU: u8 = 255;
}

/// Pseudo-encodings announced in SetEncodings
pub mod encoding {
    pub const DESKTOP_SIZE: i32 = -223;
    pub const QEMU_EXTENDED_KEY_EVENT: i32 = -258;
    pub const DESKTOP_NAME: i32 = -307;
}

/// Length of a repeater ID message, including the `ID:` prefix
pub const REPEATER_ID_LEN: usize = 250;

/// Longest repeater ID that fits after the `ID:` prefix
pub const MAX_REPEATER_ID_LEN: usize = REPEATER_ID_LEN - 3;

/// Outbound byte queue with bounded capacity, drained by `flush`
pub trait SendQueue {
    /// Bytes that can still be appended before the queue is full
    fn remaining(&self) -> usize;
    /// Append bytes to the queue
    fn put_slice(&mut self, data: &[u8]);
    /// Hand all queued bytes to the transport
    fn flush(&mut self);
}

/// Append one fixed-size message and flush it
fn send_message<Q: SendQueue + ?Sized>(queue: &mut Q, message: &[u8]) {
    if queue.remaining() < message.len() {
        queue.flush();
    }
    queue.put_slice(message);
    queue.flush();
}

/// KeyEvent: `[4, down, 0, 0, keysym:4]`
pub fn key_event<Q: SendQueue + ?Sized>(queue: &mut Q, keysym: u32, down: bool) {
    let mut msg = [0u8; 8];
    msg[0] = msg_type::KEY_EVENT;
    msg[1] = u8::from(down);
    msg[4..8].copy_from_slice(&keysym.to_be_bytes());
    send_message(queue, &msg);
}

/// Map an XT scancode to the keycode carried by QEMU extended key events.
///
/// Extended scancodes `0xE0xx` with `xx < 0x7F` fold into `xx | 0x80`.
pub fn rfb_keycode(scancode: u32) -> u32 {
    let upper = scancode >> 8;
    let lower = scancode & 0xff;
    if upper == 0xe0 && lower < 0x7f {
        lower | 0x80
    } else {
        scancode
    }
}

/// QEMU extended KeyEvent: `[255, 0, down:2, keysym:4, keycode:4]`
pub fn extended_key_event<Q: SendQueue + ?Sized>(
    queue: &mut Q,
    keysym: u32,
    down: bool,
    scancode: u32,
) {
    let mut msg = [0u8; 12];
    msg[0] = msg_type::QEMU;
    msg[1] = 0;
    msg[2..4].copy_from_slice(&u16::from(down).to_be_bytes());
    msg[4..8].copy_from_slice(&keysym.to_be_bytes());
    msg[8..12].copy_from_slice(&rfb_keycode(scancode).to_be_bytes());
    send_message(queue, &msg);
}

/// PointerEvent: `[5, mask, x:2, y:2]`
///
/// Coordinates keep only their low 16 bits; anything outside the 16-bit
/// range wraps.
pub fn pointer_event<Q: SendQueue + ?Sized>(queue: &mut Q, x: i32, y: i32, mask: u8) {
    let mut msg = [0u8; 6];
    msg[0] = msg_type::POINTER_EVENT;
    msg[1] = mask;
    msg[2..4].copy_from_slice(&(x as u16).to_be_bytes());
    msg[4..6].copy_from_slice(&(y as u16).to_be_bytes());
    send_message(queue, &msg);
}

/// ClientCutText: `[6, 0, 0, 0, length:4]` followed by the payload.
///
/// With `extended` the length field carries the negated byte count. The
/// payload is split to fit the queue, flushing after every chunk.
pub fn client_cut_text<Q: SendQueue + ?Sized>(queue: &mut Q, data: &[u8], extended: bool) {
    let length = if extended {
        (data.len() as u32).wrapping_neg()
    } else {
        data.len() as u32
    };

    let mut header = [0u8; 8];
    header[0] = msg_type::CLIENT_CUT_TEXT;
    header[4..8].copy_from_slice(&length.to_be_bytes());

    if queue.remaining() < header.len() {
        queue.flush();
    }
    queue.put_slice(&header);

    if data.is_empty() {
        queue.flush();
        return;
    }

    let mut rest = data;
    while !rest.is_empty() {
        let room = queue.remaining();
        if room == 0 {
            queue.flush();
            // A queue with no capacity at all takes the rest in one piece
            if queue.remaining() == 0 {
                queue.put_slice(rest);
                queue.flush();
                return;
            }
            continue;
        }

        let (chunk, tail) = rest.split_at(room.min(rest.len()));
        queue.put_slice(chunk);
        queue.flush();
        rest = tail;
    }
}

/// SetEncodings: `[2, 0, count:2, encoding:4 ...]`
pub fn set_encodings<Q: SendQueue + ?Sized>(queue: &mut Q, encodings: &[i32]) {
    let mut msg = Vec::with_capacity(4 + encodings.len() * 4);
    msg.push(msg_type::SET_ENCODINGS);
    msg.push(0);
    msg.extend_from_slice(&(encodings.len() as u16).to_be_bytes());
    for encoding in encodings {
        msg.extend_from_slice(&encoding.to_be_bytes());
    }
    send_message(queue, &msg);
}

/// ProtocolVersion: `RFB xxx.yyy\n`
pub fn protocol_version<Q: SendQueue + ?Sized>(queue: &mut Q, major: u32, minor: u32) {
    let version = format!("RFB {:03}.{:03}\n", major, minor);
    send_message(queue, version.as_bytes());
}

/// Security type selection (3.7 and later)
pub fn security_type<Q: SendQueue + ?Sized>(queue: &mut Q, security: u8) {
    send_message(queue, &[security]);
}

/// ClientInit: `[shared]`
pub fn client_init<Q: SendQueue + ?Sized>(queue: &mut Q, shared: bool) {
    send_message(queue, &[u8::from(shared)]);
}

/// Repeater ID: `ID:<id>` padded with NUL bytes to 250 bytes.
///
/// IDs longer than [`MAX_REPEATER_ID_LEN`] are cut off; callers check first.
pub fn repeater_id<Q: SendQueue + ?Sized>(queue: &mut Q, id: &str) {
    let mut msg = format!("ID:{}", id).into_bytes();
    msg.resize(REPEATER_ID_LEN, 0);
    send_message(queue, &msg);
}

/// Scale hint for the video "resize" data channel: little-endian f32.
///
/// A zero scale is degenerate and never sent.
pub fn scale_hint(scale: f64) -> Option<[u8; 4]> {
    if scale == 0.0 {
        return None;
    }
    Some((scale as f32).to_le_bytes())
}
