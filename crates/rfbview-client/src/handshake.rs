//! Connection handshake up to ServerInit
//!
//! Only the "None" security type is negotiated. The handshake consumes bytes
//! from the receive buffer one complete step at a time and writes its replies
//! straight to the send queue.

use bytes::{Buf, BytesMut};
use rfbview_core::inbound::{latin1_to_string, Reader};
use rfbview_core::protocol::{self, encoding};
use rfbview_core::{Error, Result, SendQueue};
use tracing::{debug, info};

const VERSION_LEN: usize = 12;

/// Security type without authentication
pub const SECURITY_NONE: u8 = 1;

/// Pseudo-encodings advertised once the handshake completes
pub const ENCODINGS: [i32; 3] = [
    encoding::QEMU_EXTENDED_KEY_EVENT,
    encoding::DESKTOP_NAME,
    encoding::DESKTOP_SIZE,
];

/// Negotiated protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V3_3,
    V3_7,
    V3_8,
}

impl Version {
    fn minor(&self) -> u32 {
        match self {
            Version::V3_3 => 3,
            Version::V3_7 => 7,
            Version::V3_8 => 8,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "3.{}", self.minor())
    }
}

/// Desktop description sent by the server at the end of the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Transport not open yet
    Idle,
    ProtocolVersion,
    Security,
    SecurityResult,
    ServerInit,
    Done,
}

enum Step {
    /// Need more bytes
    Wait,
    Continue,
    Complete(ServerInit),
}

/// Client side of the handshake
#[derive(Debug)]
pub struct Handshake {
    phase: Phase,
    version: Option<Version>,
    shared: bool,
    repeater_id: String,
}

impl Handshake {
    pub fn new(shared: bool, repeater_id: impl Into<String>) -> Self {
        Self {
            phase: Phase::Idle,
            version: None,
            shared,
            repeater_id: repeater_id.into(),
        }
    }

    /// Mark the transport open. Returns false if the handshake already began.
    pub fn begin(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        debug!("Starting handshake");
        self.phase = Phase::ProtocolVersion;
        true
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Run as many steps as the buffered input allows.
    ///
    /// Returns the server description once ServerInit has been read.
    pub fn process<Q: SendQueue + ?Sized>(
        &mut self,
        buf: &mut BytesMut,
        queue: &mut Q,
    ) -> Result<Option<ServerInit>> {
        loop {
            match self.step(buf, queue)? {
                Step::Wait => return Ok(None),
                Step::Continue => continue,
                Step::Complete(init) => return Ok(Some(init)),
            }
        }
    }

    fn step<Q: SendQueue + ?Sized>(&mut self, buf: &mut BytesMut, queue: &mut Q) -> Result<Step> {
        match self.phase {
            Phase::Idle => Err(Error::protocol("Received data before the connection opened")),
            Phase::ProtocolVersion => self.protocol_version(buf, queue),
            Phase::Security => self.security(buf, queue),
            Phase::SecurityResult => self.security_result(buf, queue),
            Phase::ServerInit => self.server_init(buf, queue),
            Phase::Done => Err(Error::protocol("Handshake already completed")),
        }
    }

    fn protocol_version<Q: SendQueue + ?Sized>(
        &mut self,
        buf: &mut BytesMut,
        queue: &mut Q,
    ) -> Result<Step> {
        if buf.len() < VERSION_LEN {
            return Ok(Step::Wait);
        }
        let raw = buf.split_to(VERSION_LEN);
        let text = latin1_to_string(&raw);

        let number = text
            .strip_prefix("RFB ")
            .and_then(|rest| rest.strip_suffix('\n'))
            .ok_or_else(|| Error::protocol(format!("Invalid server version {:?}", text)))?;

        let version = match number {
            "000.000" => {
                // UltraVNC repeater: identify ourselves, then the real server speaks
                if self.repeater_id.is_empty() {
                    return Err(Error::protocol("Repeater requires an ID, none configured"));
                }
                if self.repeater_id.len() > protocol::MAX_REPEATER_ID_LEN {
                    return Err(Error::protocol(format!(
                        "Repeater ID is {} bytes, at most {} allowed",
                        self.repeater_id.len(),
                        protocol::MAX_REPEATER_ID_LEN
                    )));
                }
                info!("Sending repeater ID");
                protocol::repeater_id(queue, &self.repeater_id);
                return Ok(Step::Continue);
            }
            "003.003" | "003.006" => Version::V3_3,
            "003.007" => Version::V3_7,
            "003.008" | "003.889" | "004.000" | "004.001" | "005.000" => Version::V3_8,
            other => {
                return Err(Error::protocol(format!("Invalid server version {}", other)));
            }
        };

        info!("Server version {}, using {}", number, version);
        protocol::protocol_version(queue, 3, version.minor());
        self.version = Some(version);
        self.phase = Phase::Security;
        Ok(Step::Continue)
    }

    fn security<Q: SendQueue + ?Sized>(&mut self, buf: &mut BytesMut, queue: &mut Q) -> Result<Step> {
        let version = self.version.unwrap_or(Version::V3_8);
        let mut r = Reader::new(&buf[..]);

        let types: Vec<u8> = if version == Version::V3_3 {
            let Some(security) = r.u32() else { return Ok(Step::Wait) };
            if security == 0 {
                let Some(reason) = read_reason(&mut r) else { return Ok(Step::Wait) };
                return Err(Error::SecurityFailure(reason));
            }
            vec![u8::try_from(security).unwrap_or(u8::MAX)]
        } else {
            let Some(count) = r.u8() else { return Ok(Step::Wait) };
            if count == 0 {
                let Some(reason) = read_reason(&mut r) else { return Ok(Step::Wait) };
                return Err(Error::SecurityFailure(reason));
            }
            let Some(types) = r.bytes(usize::from(count)) else { return Ok(Step::Wait) };
            types.to_vec()
        };
        let consumed = r.consumed();
        buf.advance(consumed);

        debug!("Server security types: {:?}", types);
        if !types.contains(&SECURITY_NONE) {
            return Err(Error::UnsupportedSecurity(types));
        }

        if version != Version::V3_3 {
            protocol::security_type(queue, SECURITY_NONE);
        }

        if version == Version::V3_8 {
            self.phase = Phase::SecurityResult;
        } else {
            protocol::client_init(queue, self.shared);
            self.phase = Phase::ServerInit;
        }
        Ok(Step::Continue)
    }

    fn security_result<Q: SendQueue + ?Sized>(
        &mut self,
        buf: &mut BytesMut,
        queue: &mut Q,
    ) -> Result<Step> {
        let mut r = Reader::new(&buf[..]);
        let Some(status) = r.u32() else { return Ok(Step::Wait) };

        if status != 0 {
            let Some(reason) = read_reason(&mut r) else { return Ok(Step::Wait) };
            return Err(Error::SecurityFailure(reason));
        }
        let consumed = r.consumed();
        buf.advance(consumed);

        protocol::client_init(queue, self.shared);
        self.phase = Phase::ServerInit;
        Ok(Step::Continue)
    }

    fn server_init<Q: SendQueue + ?Sized>(
        &mut self,
        buf: &mut BytesMut,
        queue: &mut Q,
    ) -> Result<Step> {
        let mut r = Reader::new(&buf[..]);
        let Some(width) = r.u16() else { return Ok(Step::Wait) };
        let Some(height) = r.u16() else { return Ok(Step::Wait) };
        let Some(_pixel_format) = r.bytes(16) else { return Ok(Step::Wait) };
        let Some(name_len) = r.u32() else { return Ok(Step::Wait) };
        let Some(name) = r.bytes(name_len as usize) else { return Ok(Step::Wait) };
        let name = String::from_utf8_lossy(name).into_owned();
        let consumed = r.consumed();
        buf.advance(consumed);

        info!("Screen: {}x{}, name {:?}", width, height, name);
        protocol::set_encodings(queue, &ENCODINGS);

        self.phase = Phase::Done;
        Ok(Step::Complete(ServerInit {
            width,
            height,
            name,
        }))
    }
}

/// Length-prefixed failure reason
fn read_reason(r: &mut Reader<'_>) -> Option<String> {
    let len = r.u32()?;
    let reason = r.bytes(len as usize)?;
    Some(String::from_utf8_lossy(reason).into_owned())
}
