//! rfbview - remote framebuffer client
//!
//! Connects to an RFB server over TCP, reads input events as JSON lines from
//! stdin and prints session events as JSON lines.

use anyhow::{Context, Result};
use clap::Parser;
use rfbview_client::{Command, LoggingSurface, Session, SessionEvent, TcpTransport};
use rfbview_core::{InputEvent, Options};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// rfbview - drive a remote desktop from the command line
#[derive(Parser, Debug)]
#[command(name = "rfbview")]
#[command(version, about, long_about = None)]
struct Args {
    /// Server address (host:port or tcp://host:port)
    address: String,

    /// JSON file with session options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ask the server to disconnect other clients
    #[arg(long)]
    no_shared: bool,

    /// UltraVNC repeater ID
    #[arg(long)]
    repeater_id: Option<String>,

    /// Never send keyboard or pointer input
    #[arg(long)]
    view_only: bool,

    /// Pan the viewport with mouse drags
    #[arg(long)]
    drag_viewport: bool,

    /// Clip the viewport to the container size
    #[arg(long)]
    clip_viewport: bool,

    /// Scale the viewport to the container size
    #[arg(long)]
    scale_viewport: bool,

    /// Show a dot for invisible cursors
    #[arg(long)]
    show_dot_cursor: bool,

    /// Background color around the desktop
    #[arg(long)]
    background: Option<String>,

    /// Container width in pixels
    #[arg(short = 'W', long)]
    width: Option<u32>,

    /// Container height in pixels
    #[arg(short = 'H', long)]
    height: Option<u32>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Command line flags layered over the config file
    fn options(&self) -> Result<Options> {
        let mut options = match &self.config {
            Some(path) => Options::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => Options::new(),
        };

        if self.no_shared {
            options = options.with_shared(false);
        }
        if let Some(id) = &self.repeater_id {
            options = options.with_repeater_id(id.clone());
        }
        if self.view_only {
            options = options.with_view_only(true);
        }
        if self.drag_viewport {
            options = options.with_drag_viewport(true);
        }
        if self.clip_viewport {
            options = options.with_clip_viewport(true);
        }
        if self.scale_viewport {
            options = options.with_scale_viewport(true);
        }
        if self.show_dot_cursor {
            options = options.with_show_dot_cursor(true);
        }
        if let Some(background) = &self.background {
            options = options.with_background(background.clone());
        }

        Ok(options)
    }
}

/// Forward JSON input lines from stdin as session commands
async fn read_stdin(commands: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed");
                break;
            }
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<InputEvent>(&line) {
            Ok(event) => {
                if commands.send(Command::Input(event)).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Ignoring invalid input event: {}", e),
        }
    }
}

/// Print session events as JSON lines
async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Failed to encode event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event printer lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    info!("rfbview v{}", env!("CARGO_PKG_VERSION"));

    let options = args.options()?;
    debug!("Options: {:?}", options);

    let (transport, transport_events) = TcpTransport::new();
    let session = Session::new(args.address.clone(), options, transport, LoggingSurface);
    let printer = tokio::spawn(print_events(session.subscribe()));

    let (command_tx, command_rx) = mpsc::channel::<Command>(256);

    if let (Some(width), Some(height)) = (args.width, args.height) {
        command_tx
            .send(Command::ResizeContainer { width, height })
            .await
            .context("Command channel closed")?;
    }

    tokio::spawn(read_stdin(command_tx.clone()));

    let ctrl_c_tx = command_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, disconnecting...");
            let _ = ctrl_c_tx.send(Command::Disconnect).await;
        }
    });

    info!("Connecting to {}", args.address);
    let session = rfbview_client::run(session, transport_events, command_rx).await;

    // Dropping the session closes the event channel and ends the printer
    let name = session.desktop_name().to_string();
    drop(session);
    let _ = printer.await;

    if !name.is_empty() {
        info!("Disconnected from '{}'", name);
    }

    Ok(())
}
