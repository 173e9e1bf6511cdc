//! dockctl: command-line client for the edgedock daemon.
//!
//! Each subcommand sends one request to edgedockd and prints the reply's
//! `data` payload as JSON. Daemon errors go to stderr with a non-zero exit.

mod daemon_client;

use clap::{Parser, Subcommand, ValueEnum};
use edgedock_protocol::Method;
use edgedock_session::DockPosition;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dockctl")]
#[command(about = "Control edgedock docks through the daemon")]
#[command(version)]
struct Cli {
    /// Daemon socket (defaults to ~/.edgedock/daemon.sock)
    #[arg(long, global = true, env = "EDGEDOCK_SOCKET", value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record activity on a dock
    Touch {
        #[arg(value_name = "POSITION")]
        position: DockPosition,

        /// The touch came from the fold strip (ignored in full-screen mode)
        #[arg(long)]
        fold: bool,
    },

    /// Keep a dock open until the token is unblocked
    Block {
        #[arg(value_name = "POSITION")]
        position: DockPosition,

        #[arg(value_name = "TOKEN")]
        token: String,
    },

    /// Release one hold of a token
    Unblock {
        #[arg(value_name = "POSITION")]
        position: DockPosition,

        #[arg(value_name = "TOKEN")]
        token: String,
    },

    /// Report the pointer entering or leaving a dock
    Pointer {
        #[arg(value_name = "POSITION")]
        position: DockPosition,

        #[arg(value_enum)]
        movement: PointerMovement,
    },

    /// Show every dock and its session
    Status,

    /// Check that the daemon is up
    Health,

    /// Toggle full-screen mode
    FullScreen,

    /// Re-read the settings file
    Reload,

    /// Apply the configured exit behavior
    Exit,
}

#[derive(Clone, Copy, ValueEnum)]
enum PointerMovement {
    Enter,
    Leave,
}

impl Commands {
    fn into_request(self) -> (Method, Option<Value>) {
        match self {
            Commands::Touch { position, fold } => (
                Method::Touch,
                Some(json!({
                    "position": position,
                    "source": if fold { "fold" } else { "dock" },
                })),
            ),
            Commands::Block { position, token } => (
                Method::Block,
                Some(json!({ "position": position, "token": token })),
            ),
            Commands::Unblock { position, token } => (
                Method::Unblock,
                Some(json!({ "position": position, "token": token })),
            ),
            Commands::Pointer { position, movement } => (
                Method::Pointer,
                Some(json!({
                    "position": position,
                    "inside": matches!(movement, PointerMovement::Enter),
                })),
            ),
            Commands::Status => (Method::GetStatus, None),
            Commands::Health => (Method::GetHealth, None),
            Commands::FullScreen => (Method::ToggleFullScreen, None),
            Commands::Reload => (Method::Reload, None),
            Commands::Exit => (Method::Exit, None),
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let socket = match cli.socket.map(Ok).unwrap_or_else(daemon_client::default_socket_path) {
        Ok(socket) => socket,
        Err(err) => {
            eprintln!("dockctl: {}", err);
            std::process::exit(2);
        }
    };

    let (method, params) = cli.command.into_request();
    tracing::debug!(method = ?method, socket = %socket.display(), "Sending request");

    match daemon_client::call(&socket, method, params) {
        Ok(data) => match serde_json::to_string_pretty(&data) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                eprintln!("dockctl: failed to format reply: {}", err);
                std::process::exit(1);
            }
        },
        Err(err) => {
            tracing::debug!(error = %err, "Request failed");
            eprintln!("dockctl: {}", err);
            std::process::exit(1);
        }
    }
}
