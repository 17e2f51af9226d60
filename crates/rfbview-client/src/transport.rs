//! Byte transport contract, send queue and the TCP transport
//!
//! The session never touches sockets directly. It opens, closes and writes
//! through [`Transport`], and receives [`TransportEvent`]s from whoever
//! drives it.

use bytes::{Bytes, BytesMut};
use rfbview_core::SendQueue;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Size of the outgoing buffer; larger payloads are flushed in pieces
pub const SEND_BUFFER_SIZE: usize = 10 * 1024;

/// Read buffer growth per read call
const READ_CHUNK: usize = 64 * 1024;

/// Close code and reason reported by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// Notifications produced by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(Bytes),
    Close(Option<CloseInfo>),
    Error(String),
}

/// Why a transport could not be opened
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Ordered, reliable byte channel
pub trait Transport {
    /// Start connecting. Completion is reported later as `TransportEvent::Open`.
    fn open(&mut self, url: &str, protocols: &[String]) -> Result<(), OpenError>;

    /// Start closing. Completion is reported as `TransportEvent::Close`.
    fn close(&mut self);

    /// Queue bytes for sending
    fn send(&mut self, data: Bytes);
}

/// Bounded send buffer in front of a transport.
///
/// Encoders append into the buffer and flush; a flush hands everything
/// buffered so far to the transport as one write.
pub struct Channel<T> {
    transport: T,
    buffer: BytesMut,
    capacity: usize,
}

impl<T: Transport> Channel<T> {
    pub fn new(transport: T) -> Self {
        Self::with_capacity(transport, SEND_BUFFER_SIZE)
    }

    pub fn with_capacity(transport: T, capacity: usize) -> Self {
        Self {
            transport,
            buffer: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport> SendQueue for Channel<T> {
    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buffer.len())
    }

    fn put_slice(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let data = self.buffer.split().freeze();
        self.transport.send(data);
    }
}

/// Parse `tcp://host:port` or `host:port` into a connectable address
pub fn parse_address(url: &str) -> Result<String, OpenError> {
    let address = match url.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some(_) => return Err(OpenError::InvalidAddress(url.to_string())),
        None => url,
    };
    let address = address.trim_end_matches('/');

    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(address.to_string())
        }
        _ => Err(OpenError::InvalidAddress(url.to_string())),
    }
}

/// Plain TCP transport running on the tokio runtime
pub struct TcpTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Create a transport and the receiver its events are delivered on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                events,
                writer: None,
                task: None,
            },
            rx,
        )
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, url: &str, protocols: &[String]) -> Result<(), OpenError> {
        let address = parse_address(url)?;

        if self.writer.is_some() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "transport already open").into());
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(io::Error::other)?;

        if !protocols.is_empty() {
            debug!("Ignoring sub-protocols {:?} for TCP transport", protocols);
        }

        let (writer, outgoing) = mpsc::unbounded_channel();
        let events = self.events.clone();
        self.task = Some(handle.spawn(run_connection(address, events, outgoing)));
        self.writer = Some(writer);
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the writer shuts down the write half once queued data is out
        if self.writer.take().is_some() {
            debug!("Closing TCP transport");
        }
    }

    fn send(&mut self, data: Bytes) {
        match &self.writer {
            Some(writer) => {
                if writer.send(data).is_err() {
                    warn!("Dropping outgoing data: connection is gone");
                }
            }
            None => warn!("Dropping {} bytes sent on a closed transport", data.len()),
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_connection(
    address: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outgoing: mpsc::UnboundedReceiver<Bytes>,
) {
    let stream = match TcpStream::connect(&address).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Close(None));
            return;
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY: {}", e);
    }

    info!("TCP connection established to {}", address);
    let _ = events.send(TransportEvent::Open);

    let (mut reader, mut writer) = stream.into_split();

    let writer_task = tokio::spawn(async move {
        while let Some(data) = outgoing.recv().await {
            writer.write_all(&data).await?;
        }
        writer.shutdown().await
    });

    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("TCP connection closed by peer");
                let _ = events.send(TransportEvent::Close(None));
                break;
            }
            Ok(_) => {
                let _ = events.send(TransportEvent::Message(buf.split().freeze()));
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                let _ = events.send(TransportEvent::Close(None));
                break;
            }
        }
    }

    writer_task.abort();
}
