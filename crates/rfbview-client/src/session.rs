//! Client session: connection lifecycle and input dispatch
//!
//! The session is a synchronous state machine. Transport events, local input
//! and timer expiry are fed in by the caller together with the current time;
//! everything the session produces goes out through the transport, the
//! [`Surface`] or the lifecycle event channel.

use crate::cursor::CursorManager;
use crate::events::SessionEvent;
use crate::handshake::{Handshake, ServerInit};
use crate::surface::Surface;
use crate::transport::{Channel, CloseInfo, OpenError, Transport, TransportEvent};
use crate::viewport::{Viewport, ViewportGeometry};
use bytes::{Bytes, BytesMut};
use rfbview_core::inbound::{self, PseudoRect, ServerMessage};
use rfbview_core::timer::earliest;
use rfbview_core::{
    protocol, ConnectionState, CursorImage, Error, InputEvent, Options, Result, SendQueue, Timer,
};
use rfbview_input::keysym::{XK_ALT_L, XK_CONTROL_L, XK_DELETE};
use rfbview_input::{
    mask, xt_scancode, GestureTranslator, InputSink, MouseCoalescer, WheelAccumulator,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Time allowed for the transport to confirm a close
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Delay before clip and scale follow a container resize
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(16);

/// Capacity of the lifecycle event channel
const EVENT_CHANNEL_SIZE: usize = 64;

/// Capability announced when the server accepts extended key events
pub const CAP_EXTENDED_KEYS: &str = "qemu-extended-key-event";

/// Local input engines, owned by the session
#[derive(Debug, Default)]
struct InputState {
    mouse: MouseCoalescer,
    wheel: WheelAccumulator,
    gestures: GestureTranslator,
}

/// Input output path: maps coordinates and encodes onto the transport
struct SessionSink<'a, T, S> {
    viewport: &'a mut ViewportGeometry,
    channel: &'a mut Channel<T>,
    surface: &'a mut S,
    published_viewport: &'a mut Option<Viewport>,
    /// Connected and not view-only
    enabled: bool,
    extended_keys: bool,
}

impl<T: Transport, S: Surface> InputSink for SessionSink<'_, T, S> {
    fn pointer(&mut self, x: f64, y: f64, mask: u8) {
        if !self.enabled {
            return;
        }
        let (x, y) = self.viewport.to_absolute(x, y);
        protocol::pointer_event(self.channel, x, y, mask);
    }

    fn key(&mut self, keysym: u32, code: &str, down: bool) {
        if !self.enabled {
            return;
        }
        encode_key(self.channel, self.extended_keys, Some(keysym), code, down);
    }

    fn pan_viewport(&mut self, dx: f64, dy: f64) {
        if self.viewport.change_position(dx, dy) {
            let viewport = self.viewport.viewport();
            self.surface.viewport_changed(viewport);
            *self.published_viewport = Some(viewport);
        }
    }

    fn move_cursor(&mut self, x: f64, y: f64) {
        self.surface.cursor_moved(x, y);
    }
}

/// Encode a key with the extended event when possible
fn encode_key<Q: SendQueue + ?Sized>(
    queue: &mut Q,
    extended_keys: bool,
    keysym: Option<u32>,
    code: &str,
    down: bool,
) {
    let direction = if down { "down" } else { "up" };

    if extended_keys {
        if let Some(scancode) = xt_scancode(code) {
            let keysym = keysym.unwrap_or(0);
            debug!(
                "Sending key ({}): keysym {:#x}, scancode {:#x}",
                direction, keysym, scancode
            );
            protocol::extended_key_event(queue, keysym, down, u32::from(scancode));
            return;
        }
    }

    match keysym {
        Some(keysym) if keysym != 0 => {
            debug!("Sending keysym ({}): {:#x}", direction, keysym);
            protocol::key_event(queue, keysym, down);
        }
        _ => {}
    }
}

/// Latin-1 encoding, characters outside it become '?'
fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Suffix describing a close code and reason
fn close_details(info: Option<&CloseInfo>) -> String {
    match info {
        Some(info) if info.code != 0 => {
            if info.reason.is_empty() {
                format!(" (code: {})", info.code)
            } else {
                format!(" (code: {}, reason: {})", info.code, info.reason)
            }
        }
        _ => String::new(),
    }
}

/// One connection to a remote framebuffer server
pub struct Session<T, S> {
    url: String,
    options: Options,
    state: ConnectionState,
    clean_disconnect: bool,
    /// Open, message and error notifications are handled
    listening: bool,
    /// Close notifications are handled
    close_listening: bool,
    channel: Channel<T>,
    surface: S,
    events: broadcast::Sender<SessionEvent>,
    receive: BytesMut,
    handshake: Handshake,
    viewport: ViewportGeometry,
    /// Last geometry pushed to the surface
    published_viewport: Option<Viewport>,
    published_scale: Option<f64>,
    cursor: CursorManager,
    input: InputState,
    extended_keys: bool,
    capabilities: BTreeMap<String, bool>,
    desktop_name: String,
    container: Option<(u32, u32)>,
    resize_timer: Timer,
    disconnect_timer: Timer,
}

impl<T: Transport, S: Surface> Session<T, S> {
    /// Create a session in the initial state. Nothing happens until `connect`.
    pub fn new(url: impl Into<String>, options: Options, transport: T, surface: S) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        let mut input = InputState::default();
        input.mouse.set_drag_viewport(options.drag_viewport);

        let mut capabilities = BTreeMap::new();
        capabilities.insert("power".to_string(), false);

        Self {
            url: url.into(),
            handshake: Handshake::new(options.shared, options.repeater_id.clone()),
            cursor: CursorManager::new(options.show_dot_cursor),
            options,
            state: ConnectionState::Initial,
            clean_disconnect: true,
            listening: false,
            close_listening: true,
            channel: Channel::new(transport),
            surface,
            events,
            receive: BytesMut::new(),
            viewport: ViewportGeometry::new(),
            published_viewport: None,
            published_scale: None,
            input,
            extended_keys: false,
            capabilities,
            desktop_name: String::new(),
            container: None,
            resize_timer: Timer::new(),
            disconnect_timer: Timer::new(),
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn capabilities(&self) -> &BTreeMap<String, bool> {
        &self.capabilities
    }

    pub fn desktop_name(&self) -> &str {
        &self.desktop_name
    }

    pub fn viewport(&self) -> &ViewportGeometry {
        &self.viewport
    }

    pub fn cursor(&self) -> &CursorManager {
        &self.cursor
    }

    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Whether the server accepted QEMU extended key events
    pub fn extended_keys(&self) -> bool {
        self.extended_keys
    }

    /// Start connecting
    pub fn connect(&mut self, now: Instant) {
        self.update_connection_state(ConnectionState::Connecting, now);
    }

    /// Start a clean teardown
    pub fn disconnect(&mut self, now: Instant) {
        self.update_connection_state(ConnectionState::Disconnecting, now);
    }

    /// Earliest armed timer, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([
            self.disconnect_timer.deadline(),
            self.resize_timer.deadline(),
            self.input.mouse.next_deadline(),
        ])
    }

    /// Fire every timer whose deadline has passed
    pub fn handle_timers(&mut self, now: Instant) {
        if self.disconnect_timer.fire(now) {
            error!("Disconnection timed out.");
            self.update_connection_state(ConnectionState::Disconnected, now);
        }

        if self.resize_timer.fire(now) {
            self.update_clip();
            self.update_scale();
        }

        let (input, mut sink) = self.split_input();
        input.mouse.fire_pending(now, &mut sink);
    }

    fn update_connection_state(&mut self, state: ConnectionState, now: Instant) {
        match self.transition(state, now) {
            Ok(()) => {}
            Err(Error::Disconnected) => {
                error!("Tried changing state of a disconnected session");
            }
            Err(e) => error!("{}", e),
        }
    }

    fn transition(&mut self, state: ConnectionState, now: Instant) -> Result<()> {
        let old = self.state;

        if state == old {
            debug!("Already in state '{}', ignoring", state);
            return Ok(());
        }

        if old == ConnectionState::Disconnected {
            return Err(Error::Disconnected);
        }

        if !old.can_transition_to(state) {
            return Err(Error::InvalidTransition { from: old, to: state });
        }

        self.state = state;
        debug!("New state '{}', was '{}'.", state, old);

        if old == ConnectionState::Disconnecting && self.disconnect_timer.cancel() {
            debug!("Clearing disconnect timer");
        }

        match state {
            ConnectionState::Connecting => self.open_transport(now),
            ConnectionState::Connected => self.emit(SessionEvent::Connect),
            ConnectionState::Disconnecting => {
                self.close_transport();
                self.disconnect_timer.arm(now, DISCONNECT_TIMEOUT);
            }
            ConnectionState::Disconnected => {
                // Late closes from the transport are no longer interesting
                self.close_listening = false;
                self.emit(SessionEvent::Disconnect {
                    clean: self.clean_disconnect,
                });
            }
            ConnectionState::Initial => {}
        }

        Ok(())
    }

    fn open_transport(&mut self, now: Instant) {
        info!("Connecting to {}", self.url);

        if let Err(e) = self
            .channel
            .transport_mut()
            .open(&self.url, &self.options.ws_protocols)
        {
            match e {
                OpenError::InvalidAddress(_) => {
                    self.fail(&format!("Invalid host or port ({})", e), now)
                }
                OpenError::Io(_) => self.fail(&format!("Error when opening socket ({})", e), now),
            }
            return;
        }

        self.listening = true;
        self.refresh_cursor();
    }

    fn close_transport(&mut self) {
        debug!("Disconnecting");
        self.listening = false;
        self.input.mouse.reset();
        self.resize_timer.cancel();
        self.channel.transport_mut().close();
    }

    /// Log the failure against the current phase and tear down uncleanly
    fn fail(&mut self, details: &str, now: Instant) {
        match self.state {
            ConnectionState::Connecting => error!("Failed when connecting: {}", details),
            ConnectionState::Connected => error!("Failed while connected: {}", details),
            ConnectionState::Disconnecting => error!("Failed when disconnecting: {}", details),
            _ => error!("Session failure: {}", details),
        }

        self.clean_disconnect = false;
        self.update_connection_state(ConnectionState::Disconnecting, now);
        self.update_connection_state(ConnectionState::Disconnected, now);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Feed one transport notification
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Close(info) => self.handle_close(info, now),
            _ if !self.listening => debug!("Ignoring transport event while {}", self.state),
            TransportEvent::Open => self.handle_open(now),
            TransportEvent::Message(data) => self.handle_message(data, now),
            TransportEvent::Error(e) => warn!("Transport error: {}", e),
        }
    }

    fn handle_open(&mut self, now: Instant) {
        if self.state == ConnectionState::Connecting && self.handshake.begin() {
            return;
        }
        let details = format!("Unexpected server connection while {}", self.state);
        self.fail(&details, now);
    }

    fn handle_close(&mut self, info: Option<CloseInfo>, now: Instant) {
        if !self.close_listening {
            return;
        }
        debug!("Transport closed");

        let details = close_details(info.as_ref());
        match self.state {
            ConnectionState::Connecting => {
                self.fail(&format!("Connection closed{}", details), now);
            }
            ConnectionState::Connected => {
                self.update_connection_state(ConnectionState::Disconnecting, now);
                self.update_connection_state(ConnectionState::Disconnected, now);
            }
            ConnectionState::Disconnecting => {
                self.update_connection_state(ConnectionState::Disconnected, now);
            }
            ConnectionState::Disconnected => {
                self.fail(
                    &format!("Unexpected server disconnect when already disconnected{}", details),
                    now,
                );
            }
            ConnectionState::Initial => {
                self.fail(
                    &format!("Unexpected server disconnect before connecting{}", details),
                    now,
                );
            }
        }
        self.close_listening = false;
    }

    fn handle_message(&mut self, data: Bytes, now: Instant) {
        if data.is_empty() {
            warn!("Ignoring empty message from the transport");
            return;
        }

        match self.state {
            ConnectionState::Disconnected => error!("Got data while disconnected"),
            ConnectionState::Connecting => {
                self.receive.extend_from_slice(&data);
                self.process_handshake(now);
            }
            ConnectionState::Connected => {
                self.receive.extend_from_slice(&data);
                self.process_server_messages(now);
            }
            _ => error!("Got data while in an invalid state"),
        }
    }

    fn process_handshake(&mut self, now: Instant) {
        match self.handshake.process(&mut self.receive, &mut self.channel) {
            Ok(None) => {}
            Ok(Some(init)) => self.init_complete(init, now),
            Err(e) => self.fail(&e.to_string(), now),
        }
    }

    fn init_complete(&mut self, init: ServerInit, now: Instant) {
        if let Some(version) = self.handshake.version() {
            info!(
                "Connected to '{}' ({}x{}) using RFB {}",
                init.name, init.width, init.height, version
            );
        }
        self.viewport
            .resize(u32::from(init.width), u32::from(init.height));
        self.set_desktop_name(init.name);
        self.update_connection_state(ConnectionState::Connected, now);
        self.update_clip();
        self.update_scale();

        // The server may have sent more right after ServerInit
        if !self.receive.is_empty() {
            self.process_server_messages(now);
        }
    }

    fn process_server_messages(&mut self, now: Instant) {
        while self.state == ConnectionState::Connected {
            match inbound::parse(&mut self.receive) {
                Ok(Some(message)) => self.handle_server_message(message),
                Ok(None) => break,
                Err(e) => {
                    self.fail(&e.to_string(), now);
                    break;
                }
            }
        }
    }

    fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::FramebufferUpdate(rects) => {
                for rect in rects {
                    match rect {
                        PseudoRect::ExtendedKeyEvent => self.enable_extended_keys(),
                        PseudoRect::DesktopName(name) => self.set_desktop_name(name),
                        PseudoRect::DesktopSize { width, height } => {
                            self.resize_framebuffer(u32::from(width), u32::from(height))
                        }
                    }
                }
            }
            ServerMessage::SetColourMapEntries => debug!("Ignoring SetColourMapEntries"),
            ServerMessage::Bell => self.emit(SessionEvent::Bell),
            ServerMessage::ServerCutText(text) => {
                if self.options.view_only {
                    return;
                }
                self.emit(SessionEvent::Clipboard { text });
            }
        }
    }

    fn enable_extended_keys(&mut self) {
        if self.extended_keys {
            return;
        }
        info!("Server supports QEMU extended key events");
        self.extended_keys = true;
        self.set_capability(CAP_EXTENDED_KEYS, true);
    }

    fn set_capability(&mut self, name: &str, value: bool) {
        if self.capabilities.get(name) == Some(&value) {
            return;
        }
        self.capabilities.insert(name.to_string(), value);
        self.emit(SessionEvent::Capabilities {
            capabilities: self.capabilities.clone(),
        });
    }

    fn set_desktop_name(&mut self, name: String) {
        self.desktop_name = name.clone();
        self.emit(SessionEvent::DesktopName { name });
    }

    fn resize_framebuffer(&mut self, width: u32, height: u32) {
        info!("Framebuffer resized to {}x{}", width, height);
        self.viewport.resize(width, height);
        self.update_clip();
        self.update_scale();
    }

    /// Split borrows: the input engines and the sink they write to
    fn split_input(&mut self) -> (&mut InputState, SessionSink<'_, T, S>) {
        let enabled = self.state == ConnectionState::Connected && !self.options.view_only;
        (
            &mut self.input,
            SessionSink {
                viewport: &mut self.viewport,
                channel: &mut self.channel,
                surface: &mut self.surface,
                published_viewport: &mut self.published_viewport,
                enabled,
                extended_keys: self.extended_keys,
            },
        )
    }

    /// Feed one local input event
    pub fn handle_input(&mut self, event: InputEvent, now: Instant) {
        if !self.listening {
            debug!("Ignoring input while {}", self.state);
            return;
        }

        match event {
            InputEvent::MouseDown { button, x, y } => {
                if self.options.focus_on_click {
                    self.surface.focus();
                }
                let (input, mut sink) = self.split_input();
                input
                    .mouse
                    .handle_button(x, y, true, mask::for_button(button), &mut sink);
            }
            InputEvent::MouseUp { button, x, y } => {
                let (input, mut sink) = self.split_input();
                input
                    .mouse
                    .handle_button(x, y, false, mask::for_button(button), &mut sink);
            }
            InputEvent::MouseMove { x, y } => {
                let (input, mut sink) = self.split_input();
                input.mouse.handle_move(x, y, now, &mut sink);
            }
            InputEvent::Wheel { x, y, dx, dy, mode } => {
                if self.state != ConnectionState::Connected || self.options.view_only {
                    return;
                }
                let (input, mut sink) = self.split_input();
                input
                    .wheel
                    .handle_wheel(x, y, dx, dy, mode, &mut input.mouse, &mut sink);
            }
            InputEvent::Key {
                keysym,
                code,
                down,
            } => self.send_key(keysym, &code, down),
            InputEvent::Gesture(gesture) => {
                let (input, mut sink) = self.split_input();
                input
                    .gestures
                    .handle(&gesture, now, &mut input.mouse, &mut sink);
            }
            InputEvent::Paste { text } => self.clipboard_paste_from(&text),
            InputEvent::CtrlAltDel => self.send_ctrl_alt_del(),
        }
    }

    fn can_send(&self) -> bool {
        self.state == ConnectionState::Connected && !self.options.view_only
    }

    /// Send a key; `down: None` sends press and release
    pub fn send_key(&mut self, keysym: Option<u32>, code: &str, down: Option<bool>) {
        if !self.can_send() {
            return;
        }

        match down {
            Some(down) => encode_key(&mut self.channel, self.extended_keys, keysym, code, down),
            None => {
                encode_key(&mut self.channel, self.extended_keys, keysym, code, true);
                encode_key(&mut self.channel, self.extended_keys, keysym, code, false);
            }
        }
    }

    pub fn send_ctrl_alt_del(&mut self) {
        if !self.can_send() {
            return;
        }
        info!("Sending Ctrl-Alt-Del");

        self.send_key(Some(XK_CONTROL_L), "ControlLeft", Some(true));
        self.send_key(Some(XK_ALT_L), "AltLeft", Some(true));
        self.send_key(Some(XK_DELETE), "Delete", Some(true));
        self.send_key(Some(XK_DELETE), "Delete", Some(false));
        self.send_key(Some(XK_ALT_L), "AltLeft", Some(false));
        self.send_key(Some(XK_CONTROL_L), "ControlLeft", Some(false));
    }

    /// Send local clipboard text to the server
    pub fn clipboard_paste_from(&mut self, text: &str) {
        if !self.can_send() {
            return;
        }
        let data = latin1_bytes(text);
        debug!("Sending {} bytes of clipboard text", data.len());
        protocol::client_cut_text(&mut self.channel, &data, false);
    }

    /// Record a new container size; clip and scale follow after a short delay
    pub fn resize_container(&mut self, width: u32, height: u32, now: Instant) {
        self.container = Some((width, height));
        if self.listening {
            self.resize_timer.arm(now, RESIZE_DEBOUNCE);
        }
    }

    fn container_size(&self) -> (f64, f64) {
        let (width, height) = self
            .container
            .unwrap_or_else(|| self.viewport.framebuffer_size());
        (f64::from(width), f64::from(height))
    }

    fn update_clip(&mut self) {
        let clip = self.options.clip_viewport && !self.options.scale_viewport;

        if self.viewport.clip() != clip {
            self.viewport.set_clip(clip);
        }

        if clip {
            let size = self.container_size();
            self.viewport.change_size(Some(size));
        }

        self.publish_geometry();
    }

    fn update_scale(&mut self) {
        if self.options.scale_viewport {
            let (width, height) = self.container_size();
            self.viewport.autoscale(width, height);
        } else {
            self.viewport.set_scale(1.0);
        }

        self.publish_geometry();
    }

    /// Push geometry to the surface when it differs from what it has
    fn publish_geometry(&mut self) {
        let viewport = self.viewport.viewport();
        let scale = self.viewport.scale();

        if self.published_viewport != Some(viewport) {
            self.surface.viewport_changed(viewport);
            self.published_viewport = Some(viewport);
        }
        if self.published_scale != Some(scale) {
            self.surface.scale_changed(scale);
            self.surface.scale_hint(protocol::scale_hint(scale));
            self.published_scale = Some(scale);
        }
    }

    fn refresh_cursor(&mut self) {
        if !self.state.is_active() {
            return;
        }
        let image = self.cursor.effective();
        self.surface.cursor_changed(&image);
    }

    /// Replace the server cursor
    pub fn set_cursor_image(&mut self, image: CursorImage) {
        self.cursor.set_image(image);
        self.refresh_cursor();
    }

    /// Decode and apply a packet from the cursor side channel
    pub fn handle_cursor_packet(&mut self, packet: &[u8]) {
        match CursorImage::from_packet(packet) {
            Some(image) => self.set_cursor_image(image),
            None => warn!("Ignoring truncated cursor packet ({} bytes)", packet.len()),
        }
    }

    pub fn set_view_only(&mut self, view_only: bool) {
        self.options.view_only = view_only;
    }

    pub fn set_drag_viewport(&mut self, drag: bool) {
        self.options.drag_viewport = drag;
        self.input.mouse.set_drag_viewport(drag);
    }

    pub fn set_clip_viewport(&mut self, clip: bool) {
        self.options.clip_viewport = clip;
        self.update_clip();
    }

    pub fn set_scale_viewport(&mut self, scale: bool) {
        self.options.scale_viewport = scale;
        // Scaling turns clipping off
        self.update_clip();
        self.update_scale();
    }

    pub fn set_resize_session(&mut self, resize: bool) {
        self.options.resize_session = resize;
    }

    pub fn set_show_dot_cursor(&mut self, show: bool) {
        self.options.show_dot_cursor = show;
        self.cursor.set_show_dot(show);
        self.refresh_cursor();
    }

    pub fn set_focus_on_click(&mut self, focus: bool) {
        self.options.focus_on_click = focus;
    }

    pub fn set_background(&mut self, background: impl Into<String>) {
        self.options.background = background.into();
        self.surface.background_changed(&self.options.background);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::tests::{RecordingSurface, SurfaceUpdate};
    use crate::transport::tests::MockTransport;
    use rfbview_core::{GestureEvent, GestureKind, GesturePhase, WheelDeltaMode};
    use tokio::sync::broadcast::error::TryRecvError;

    type TestSession = Session<MockTransport, RecordingSurface>;

    fn session(options: Options) -> TestSession {
        Session::new(
            "tcp://127.0.0.1:5900",
            options,
            MockTransport::default(),
            RecordingSurface::default(),
        )
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    fn server_init(width: u16, height: u16, name: &str) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[0u8; 16]);
        data.extend_from_slice(&(name.len() as u32).to_be_bytes());
        data.extend_from_slice(name.as_bytes());
        data
    }

    fn message(data: &[u8]) -> TransportEvent {
        TransportEvent::Message(Bytes::copy_from_slice(data))
    }

    /// Run a full 3.8 handshake against the session
    fn connected(options: Options, now: Instant) -> TestSession {
        let mut s = session(options);
        s.connect(now);
        s.handle_transport_event(TransportEvent::Open, now);
        s.handle_transport_event(message(b"RFB 003.008\n"), now);
        s.handle_transport_event(message(&[1, 1]), now);
        s.handle_transport_event(message(&[0, 0, 0, 0]), now);
        s.handle_transport_event(message(&server_init(1024, 768, "desk")), now);
        assert_eq!(s.state(), ConnectionState::Connected);
        s
    }

    /// Bytes sent after the handshake
    fn sent_after_handshake(s: &TestSession) -> Vec<u8> {
        // Version, security type, ClientInit, SetEncodings
        s.transport().sent[4..]
            .iter()
            .flat_map(|b| b.iter().copied())
            .collect()
    }

    /// Set `state` directly, bypassing side effects
    fn force_state(s: &mut TestSession, state: ConnectionState) {
        s.state = state;
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let now = Instant::now();
        for from in ConnectionState::ALL {
            for to in ConnectionState::ALL {
                if from == to || from.can_transition_to(to) {
                    continue;
                }
                let mut s = session(Options::new());
                force_state(&mut s, from);
                let mut rx = s.subscribe();

                s.update_connection_state(to, now);

                assert_eq!(s.state(), from, "{} -> {} must be rejected", from, to);
                assert!(drain(&mut rx).is_empty());
                assert!(s.transport().opened.is_empty());
                assert_eq!(s.transport().closed, 0);
            }
        }
    }

    #[test]
    fn test_transition_errors() {
        let now = Instant::now();
        let mut s = session(Options::new());
        assert!(matches!(
            s.transition(ConnectionState::Connected, now),
            Err(Error::InvalidTransition { .. })
        ));

        force_state(&mut s, ConnectionState::Disconnected);
        assert!(matches!(
            s.transition(ConnectionState::Connecting, now),
            Err(Error::Disconnected)
        ));
    }

    #[test]
    fn test_disconnected_is_absorbing() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);
        s.disconnect(now);
        s.handle_transport_event(TransportEvent::Close(None), now);
        assert_eq!(s.state(), ConnectionState::Disconnected);

        for to in ConnectionState::ALL {
            s.update_connection_state(to, now);
            assert_eq!(s.state(), ConnectionState::Disconnected);
        }
        s.connect(now);
        s.fail("again", now);
        assert_eq!(s.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_and_clean_disconnect() {
        let now = Instant::now();
        let mut s = session(Options::new());
        let mut rx = s.subscribe();

        s.connect(now);
        assert_eq!(s.transport().opened, vec!["tcp://127.0.0.1:5900".to_string()]);

        s.handle_transport_event(TransportEvent::Open, now);
        s.handle_transport_event(message(b"RFB 003.008\n"), now);
        s.handle_transport_event(message(&[1, 1, 0, 0, 0, 0]), now);
        s.handle_transport_event(message(&server_init(800, 600, "work")), now);

        assert_eq!(s.state(), ConnectionState::Connected);
        assert_eq!(s.desktop_name(), "work");
        assert_eq!(s.viewport().framebuffer_size(), (800, 600));
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::DesktopName {
                    name: "work".to_string()
                },
                SessionEvent::Connect
            ]
        );

        s.disconnect(now);
        assert_eq!(s.state(), ConnectionState::Disconnecting);
        assert_eq!(s.transport().closed, 1);
        assert!(s.next_deadline().is_some());

        s.handle_transport_event(TransportEvent::Close(None), now);
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert!(s.next_deadline().is_none());
        assert_eq!(drain(&mut rx), vec![SessionEvent::Disconnect { clean: true }]);
    }

    #[test]
    fn test_server_close_while_connected_is_clean() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);
        let mut rx = s.subscribe();

        s.handle_transport_event(TransportEvent::Close(None), now);
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Disconnect { clean: true }]);
    }

    #[test]
    fn test_close_while_connecting_fails() {
        let now = Instant::now();
        let mut s = session(Options::new());
        let mut rx = s.subscribe();
        s.connect(now);

        let info = CloseInfo {
            code: 1006,
            reason: "gone".to_string(),
        };
        s.handle_transport_event(TransportEvent::Close(Some(info)), now);

        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Disconnect { clean: false }]);
    }

    #[test]
    fn test_open_error_fails() {
        let now = Instant::now();
        let transport = MockTransport {
            fail_open: true,
            ..Default::default()
        };
        let mut s = Session::new("nowhere", Options::new(), transport, RecordingSurface::default());
        let mut rx = s.subscribe();

        s.connect(now);
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Disconnect { clean: false }]);

        // Listeners were never attached
        s.handle_input(InputEvent::MouseMove { x: 1.0, y: 1.0 }, now);
        assert!(s.transport().sent.is_empty());
    }

    #[test]
    fn test_unexpected_open_fails() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);
        let mut rx = s.subscribe();

        s.handle_transport_event(TransportEvent::Open, now);
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Disconnect { clean: false }]);
    }

    #[test]
    fn test_disconnect_timeout() {
        let start = Instant::now();
        let mut s = connected(Options::new(), start);
        let mut rx = s.subscribe();

        s.disconnect(start);
        assert_eq!(s.next_deadline(), Some(start + DISCONNECT_TIMEOUT));

        s.handle_timers(start + Duration::from_secs(2));
        assert_eq!(s.state(), ConnectionState::Disconnecting);

        s.handle_timers(start + DISCONNECT_TIMEOUT);
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Disconnect { clean: true }]);

        // A late close after the timeout is ignored
        s.handle_transport_event(TransportEvent::Close(None), start + DISCONNECT_TIMEOUT);
        s.handle_transport_event(TransportEvent::Close(None), start + DISCONNECT_TIMEOUT);
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_protocol_error_fails_session() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);
        let mut rx = s.subscribe();

        s.handle_transport_event(message(&[99]), now);
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Disconnect { clean: false }]);
    }

    #[test]
    fn test_close_after_failure_is_ignored() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);
        let mut rx = s.subscribe();

        s.handle_transport_event(message(&[99]), now);
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert!(!s.close_listening);

        s.handle_transport_event(TransportEvent::Close(None), now);
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Disconnect { clean: false }]);
    }

    #[test]
    fn test_security_rejection_fails_session() {
        let now = Instant::now();
        let mut s = session(Options::new());
        let mut rx = s.subscribe();
        s.connect(now);
        s.handle_transport_event(TransportEvent::Open, now);
        s.handle_transport_event(message(b"RFB 003.008\n"), now);
        s.handle_transport_event(message(&[1, 2]), now);

        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert_eq!(drain(&mut rx), vec![SessionEvent::Disconnect { clean: false }]);
    }

    #[test]
    fn test_server_messages() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);
        let mut rx = s.subscribe();

        let mut update = vec![0u8, 0, 0, 2];
        update.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
        update.extend_from_slice(&rfbview_core::protocol::encoding::QEMU_EXTENDED_KEY_EVENT.to_be_bytes());
        update.extend_from_slice(&[0, 0, 0, 0, 0x05, 0x00, 0x03, 0x20]);
        update.extend_from_slice(&rfbview_core::protocol::encoding::DESKTOP_SIZE.to_be_bytes());
        update.push(2); // Bell
        update.extend_from_slice(&[3, 0, 0, 0, 0, 0, 0, 2, b'h', b'i']);

        s.handle_transport_event(message(&update), now);

        assert!(s.extended_keys());
        assert_eq!(s.viewport().framebuffer_size(), (1280, 800));

        let mut expected = BTreeMap::new();
        expected.insert("power".to_string(), false);
        expected.insert(CAP_EXTENDED_KEYS.to_string(), true);
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Capabilities {
                    capabilities: expected
                },
                SessionEvent::Bell,
                SessionEvent::Clipboard {
                    text: "hi".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_pointer_maps_through_viewport() {
        let start = Instant::now();
        let mut s = connected(Options::new(), start);

        s.handle_input(InputEvent::MouseMove { x: 300.0, y: 200.0 }, start);
        s.handle_input(
            InputEvent::MouseDown {
                button: 0,
                x: 300.0,
                y: 200.0,
            },
            start + Duration::from_millis(1),
        );

        assert_eq!(
            sent_after_handshake(&s),
            vec![5, 0, 1, 44, 0, 200, 5, 1, 1, 44, 0, 200]
        );
        assert!(s
            .surface()
            .updates
            .contains(&SurfaceUpdate::Focus));
    }

    #[test]
    fn test_view_only_suppresses_output() {
        let start = Instant::now();
        let mut s = connected(Options::new().with_view_only(true), start);

        s.handle_input(InputEvent::MouseMove { x: 1.0, y: 1.0 }, start);
        s.handle_input(
            InputEvent::Key {
                keysym: Some(0x61),
                code: "KeyA".to_string(),
                down: None,
            },
            start,
        );
        s.send_ctrl_alt_del();
        s.clipboard_paste_from("text");

        assert!(sent_after_handshake(&s).is_empty());
    }

    #[test]
    fn test_input_before_connected_is_not_sent() {
        let now = Instant::now();
        let mut s = session(Options::new());
        s.connect(now);
        s.handle_input(InputEvent::MouseMove { x: 1.0, y: 1.0 }, now);
        s.send_key(Some(0xff1b), "Escape", None);
        assert!(s.transport().sent.is_empty());
    }

    #[test]
    fn test_send_key_press_and_release() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);

        s.send_key(Some(0xff1b), "Escape", None);
        assert_eq!(
            sent_after_handshake(&s),
            vec![4, 1, 0, 0, 0, 0, 0xff, 0x1b, 4, 0, 0, 0, 0, 0, 0xff, 0x1b]
        );
    }

    #[test]
    fn test_send_key_without_keysym_is_noop() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);
        s.send_key(None, "KeyA", Some(true));
        s.send_key(Some(0), "", Some(true));
        assert!(sent_after_handshake(&s).is_empty());
    }

    #[test]
    fn test_extended_key_needs_capability_and_scancode() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);
        s.enable_extended_keys();

        s.send_key(None, "KeyA", Some(true));
        s.send_key(Some(0x61), "NoSuchKey", Some(true));
        s.send_key(Some(0xff51), "ArrowLeft", Some(false));

        assert_eq!(
            sent_after_handshake(&s),
            vec![
                255, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0x1e, //
                4, 1, 0, 0, 0, 0, 0, 0x61, //
                255, 0, 0, 0, 0, 0, 0xff, 0x51, 0, 0, 0, 0xcb,
            ]
        );
    }

    #[test]
    fn test_ctrl_alt_del_order() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);
        s.send_ctrl_alt_del();

        let sent = sent_after_handshake(&s);
        let keys: Vec<(u8, u32)> = sent
            .chunks(8)
            .map(|m| (m[1], u32::from_be_bytes([m[4], m[5], m[6], m[7]])))
            .collect();
        assert_eq!(
            keys,
            vec![
                (1, XK_CONTROL_L),
                (1, XK_ALT_L),
                (1, XK_DELETE),
                (0, XK_DELETE),
                (0, XK_ALT_L),
                (0, XK_CONTROL_L),
            ]
        );
    }

    #[test]
    fn test_clipboard_paste_latin1() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);
        s.clipboard_paste_from("h\u{e9}\u{20ac}");

        assert_eq!(
            sent_after_handshake(&s),
            vec![6, 0, 0, 0, 0, 0, 0, 3, b'h', 0xe9, b'?']
        );
    }

    #[test]
    fn test_wheel_gated_and_stepped() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);

        s.handle_input(
            InputEvent::Wheel {
                x: 0.0,
                y: 0.0,
                dx: 0.0,
                dy: 75.0,
                mode: WheelDeltaMode::Pixel,
            },
            now,
        );
        assert_eq!(
            sent_after_handshake(&s),
            vec![5, 0x10, 0, 0, 0, 0, 5, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_pending_move_fires_from_timers() {
        let start = Instant::now();
        let mut s = connected(Options::new(), start);

        s.handle_input(InputEvent::MouseMove { x: 1.0, y: 1.0 }, start);
        s.handle_input(InputEvent::MouseMove { x: 2.0, y: 2.0 }, start + Duration::from_millis(5));
        let deadline = s.next_deadline().unwrap();
        assert_eq!(deadline, start + Duration::from_millis(17));

        s.handle_timers(deadline);
        assert_eq!(
            sent_after_handshake(&s),
            vec![5, 0, 0, 1, 0, 1, 5, 0, 0, 2, 0, 2]
        );
    }

    #[test]
    fn test_drag_viewport_pans_clipped_viewport() {
        let start = Instant::now();
        let options = Options::new().with_clip_viewport(true).with_drag_viewport(true);
        let mut s = connected(options, start);
        s.resize_container(400, 300, start);
        s.handle_timers(start + RESIZE_DEBOUNCE);
        assert_eq!(s.viewport().viewport().w, 400);

        s.handle_input(
            InputEvent::MouseDown {
                button: 0,
                x: 200.0,
                y: 200.0,
            },
            start,
        );
        s.handle_input(InputEvent::MouseMove { x: 150.0, y: 180.0 }, start);
        s.handle_input(
            InputEvent::MouseUp {
                button: 0,
                x: 150.0,
                y: 180.0,
            },
            start,
        );

        let vp = s.viewport().viewport();
        assert_eq!((vp.x, vp.y), (50, 20));
        assert_eq!(s.surface().last_viewport(), Some(vp));
        assert!(sent_after_handshake(&s).is_empty());
    }

    #[test]
    fn test_desktop_size_after_pan_republishes_viewport() {
        let start = Instant::now();
        let options = Options::new().with_clip_viewport(true).with_drag_viewport(true);
        let mut s = connected(options, start);
        s.resize_container(400, 300, start);
        s.handle_timers(start + RESIZE_DEBOUNCE);

        s.handle_input(
            InputEvent::MouseDown {
                button: 0,
                x: 200.0,
                y: 200.0,
            },
            start,
        );
        s.handle_input(InputEvent::MouseMove { x: 150.0, y: 180.0 }, start);
        s.handle_input(
            InputEvent::MouseUp {
                button: 0,
                x: 150.0,
                y: 180.0,
            },
            start,
        );
        let panned = s.viewport().viewport();
        assert_eq!((panned.x, panned.y), (50, 20));

        // Same framebuffer size again: the viewport is clamped back to the origin
        let mut update = vec![0u8, 0, 0, 1];
        update.extend_from_slice(&[0, 0, 0, 0, 0x04, 0x00, 0x03, 0x00]);
        update.extend_from_slice(&rfbview_core::protocol::encoding::DESKTOP_SIZE.to_be_bytes());
        s.handle_transport_event(message(&update), start);

        let actual = s.viewport().viewport();
        assert_ne!(actual, panned);
        assert_eq!(s.surface().last_viewport(), Some(actual));
    }

    #[test]
    fn test_resize_is_debounced() {
        let start = Instant::now();
        let mut s = connected(Options::new().with_scale_viewport(true), start);

        s.resize_container(512, 384, start);
        s.resize_container(2048, 1536, start + Duration::from_millis(10));
        assert_eq!(s.next_deadline(), Some(start + Duration::from_millis(26)));

        s.handle_timers(start + Duration::from_millis(20));
        assert_eq!(s.viewport().scale(), 1.0);

        s.handle_timers(start + Duration::from_millis(26));
        assert_eq!(s.viewport().scale(), 2.0);
        assert_eq!(s.surface().last_scale(), Some(2.0));
        assert!(s
            .surface()
            .updates
            .contains(&SurfaceUpdate::ScaleHint(Some(2.0f32.to_le_bytes()))));
    }

    #[test]
    fn test_cursor_pushed_only_while_active() {
        let now = Instant::now();
        let mut s = session(Options::new().with_show_dot_cursor(true));

        s.set_cursor_image(CursorImage::new(vec![0, 0, 0, 255], 1, 1, 0, 0));
        assert!(s.surface().cursors().is_empty());

        // Connecting pushes the current cursor
        s.connect(now);
        assert_eq!(s.surface().cursors().len(), 1);

        s.handle_cursor_packet(&[1, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(s.surface().cursors().last(), Some(&CursorImage::dot()));

        s.set_show_dot_cursor(false);
        assert_eq!(s.surface().cursors().last().map(|c| c.width), Some(1));

        s.disconnect(now);
        s.set_show_dot_cursor(true);
        assert_eq!(s.surface().cursors().len(), 3);
    }

    #[test]
    fn test_gesture_tap_clicks() {
        let now = Instant::now();
        let mut s = connected(Options::new(), now);

        let tap = GestureEvent::new(GesturePhase::Start, GestureKind::OneTap, 10.0, 20.0);
        s.handle_input(InputEvent::Gesture(tap), now);

        assert_eq!(
            sent_after_handshake(&s),
            vec![5, 0, 0, 10, 0, 20, 5, 1, 0, 10, 0, 20, 5, 0, 0, 10, 0, 20]
        );
        assert!(s
            .surface()
            .updates
            .contains(&SurfaceUpdate::CursorMoved(10.0, 20.0)));
    }

    #[test]
    fn test_background_pushed_to_surface() {
        let mut s = session(Options::new());
        s.set_background("black");
        assert_eq!(s.options().background, "black");
        assert_eq!(
            s.surface().updates,
            vec![SurfaceUpdate::Background("black".to_string())]
        );
    }
}
