//! Async event loop around a session
//!
//! Runs on a single task: transport events, local commands and timer
//! deadlines are multiplexed with `select!` and fed into the session one at
//! a time.

use crate::session::Session;
use crate::surface::Surface;
use crate::transport::{Transport, TransportEvent};
use rfbview_core::{ConnectionState, InputEvent};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Local request for the session
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Input(InputEvent),
    ResizeContainer { width: u32, height: u32 },
    Disconnect,
}

/// Sleep until `deadline`, or forever without one
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Drive `session` until it is disconnected.
///
/// Connects first if the session is still in its initial state. Also returns
/// once both the transport and command channels are closed.
pub async fn run<T, S>(
    mut session: Session<T, S>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    mut commands: mpsc::Receiver<Command>,
) -> Session<T, S>
where
    T: Transport,
    S: Surface,
{
    if session.state() == ConnectionState::Initial {
        session.connect(Instant::now());
    }

    let mut transport_open = true;
    let mut commands_open = true;

    while session.state() != ConnectionState::Disconnected {
        if !transport_open && !commands_open {
            debug!("All event sources closed");
            break;
        }

        let deadline = session.next_deadline();

        tokio::select! {
            event = transport_events.recv(), if transport_open => match event {
                Some(event) => session.handle_transport_event(event, Instant::now()),
                None => transport_open = false,
            },
            command = commands.recv(), if commands_open => match command {
                Some(Command::Input(event)) => session.handle_input(event, Instant::now()),
                Some(Command::ResizeContainer { width, height }) => {
                    session.resize_container(width, height, Instant::now())
                }
                Some(Command::Disconnect) => session.disconnect(Instant::now()),
                None => {
                    debug!("Command channel closed");
                    commands_open = false;
                }
            },
            _ = sleep_until(deadline) => session.handle_timers(Instant::now()),
        }
    }

    info!("Session finished in state '{}'", session.state());
    session
}
