//! edgedock daemon entrypoint.
//!
//! Hosts one activity session per configured dock and serves line-delimited
//! JSON requests on a Unix socket. Every connection carries one request and
//! gets one reply.

use chrono::{DateTime, Utc};
use clap::Parser;
use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use edgedock_protocol::{
    parse_block, parse_pointer, parse_touch, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use edgedock_session::{load_config, DockConfig};
use serde_json::Value;

mod docks;

use docks::{DockRegistry, ExitOutcome};

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

#[derive(Parser)]
#[command(name = "edgedockd")]
#[command(about = "edgedock dock session daemon")]
#[command(version)]
struct Args {
    /// Settings file (defaults to ~/.edgedock/edgedock.toml)
    #[arg(long, env = "EDGEDOCK_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Socket to listen on (defaults to ~/.edgedock/daemon.sock)
    #[arg(long, env = "EDGEDOCK_SOCKET", value_name = "PATH")]
    socket: Option<PathBuf>,
}

struct DaemonState {
    registry: DockRegistry,
    socket_path: PathBuf,
    started_at: DateTime<Utc>,
}

fn main() {
    init_logging();
    let args = Args::parse();

    let socket_path = match args.socket.clone().map(Ok).unwrap_or_else(daemon_socket_path) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let config = match load_config(args.config.clone()) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load edgedock config; using defaults");
            DockConfig::default()
        }
    };
    info!(
        debounce_ms = config.session.debounce_ms,
        positions = ?config.docks.positions,
        exit_behavior = ?config.daemon.exit_behavior,
        "edgedock config loaded"
    );

    let registry = match DockRegistry::start(config, args.config) {
        Ok(registry) => registry,
        Err(err) => {
            error!(error = %err, "Failed to start dock sessions");
            std::process::exit(1);
        }
    };

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "edgedock daemon started");

    let state = Arc::new(DaemonState {
        registry,
        socket_path,
        started_at: Utc::now(),
    });

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("EDGEDOCK_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".edgedock").join(SOCKET_NAME))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<DaemonState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let (response, outcome) = handle_request(request, &state);
    let _ = write_response(&mut stream, response);

    if outcome == Some(ExitOutcome::Shutdown) {
        drop(stream);
        shutdown(&state);
    }
}

fn shutdown(state: &DaemonState) -> ! {
    if let Err(err) = state.registry.shutdown() {
        warn!(error = %err, "Dock sessions did not stop cleanly");
    }
    if let Err(err) = remove_existing_socket(&state.socket_path) {
        warn!(error = %err, "Failed to remove daemon socket");
    }
    info!("edgedock daemon stopped");
    std::process::exit(0);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &DaemonState) -> (Response, Option<ExitOutcome>) {
    if request.protocol_version != PROTOCOL_VERSION {
        let response = Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
        return (response, None);
    }

    let id = request.id;
    let registry = &state.registry;
    let result: Result<Value, ErrorInfo> = match request.method {
        Method::GetHealth => Ok(serde_json::json!({
            "status": "ok",
            "pid": std::process::id(),
            "version": env!("CARGO_PKG_VERSION"),
            "protocol_version": PROTOCOL_VERSION,
            "started_at": state.started_at.to_rfc3339(),
            "docks": registry.dock_count(),
            "full_screen": registry.is_full_screen(),
        })),
        Method::GetStatus => to_data("status", &registry.status()),
        Method::Touch => parse_touch(request.params).and_then(|params| {
            let applied = registry.touch(&params)?;
            Ok(serde_json::json!({ "position": params.position, "applied": applied }))
        }),
        Method::Block => parse_block(request.params).and_then(|params| {
            registry.block(&params)?;
            info!(position = %params.position, token = %params.token, "Dock blocked");
            Ok(serde_json::json!({ "position": params.position, "token": params.token }))
        }),
        Method::Unblock => parse_block(request.params).and_then(|params| {
            registry.unblock(&params)?;
            info!(position = %params.position, token = %params.token, "Dock unblocked");
            Ok(serde_json::json!({ "position": params.position, "token": params.token }))
        }),
        Method::Pointer => parse_pointer(request.params).and_then(|params| {
            registry.pointer(&params)?;
            Ok(serde_json::json!({ "position": params.position, "inside": params.inside }))
        }),
        Method::ToggleFullScreen => Ok(serde_json::json!({
            "full_screen": registry.toggle_full_screen(),
        })),
        Method::Reload => match registry.reload() {
            Ok(summary) => to_data("reload summary", &summary),
            Err(err) => {
                warn!(error = %err, "Reload failed; keeping running configuration");
                Err(err.into())
            }
        },
        Method::Exit => {
            return match registry.exit() {
                Ok(outcome) => {
                    let data = serde_json::json!({
                        "exiting": outcome == ExitOutcome::Shutdown,
                        "behavior": registry.exit_behavior(),
                    });
                    (Response::ok(id, data), Some(outcome))
                }
                Err(err) => (Response::error_with_info(id, err.into()), None),
            };
        }
    };

    let response = match result {
        Ok(data) => Response::ok(id, data),
        Err(err) => {
            tracing::debug!(code = %err.code, message = %err.message, "Request rejected");
            Response::error_with_info(id, err)
        }
    };
    (response, None)
}

fn to_data<T: serde::Serialize>(what: &str, value: &T) -> Result<Value, ErrorInfo> {
    serde_json::to_value(value).map_err(|err| {
        ErrorInfo::new(
            "serialization_error",
            format!("Failed to serialize {}: {}", what, err),
        )
    })
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
