//! Client helper for talking to edgedockd.
//!
//! One request per connection. Daemon-side failures come back as
//! `code: message` strings so the CLI can print them as-is.

use edgedock_protocol::{Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION};
use serde_json::Value;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 2000;
const WRITE_TIMEOUT_MS: u64 = 600;

pub fn default_socket_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".edgedock").join(SOCKET_NAME))
}

/// Sends `method` and returns the response payload, or the daemon's error.
pub fn call(socket: &Path, method: Method, params: Option<Value>) -> Result<Value, String> {
    let request = Request::new(method, params).with_id(format!("dockctl-{}", std::process::id()));
    let response = send_request(socket, &request)?;
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "Unknown daemon error".to_string()))
    }
}

fn send_request(socket: &Path, request: &Request) -> Result<Response, String> {
    let mut stream = UnixStream::connect(socket).map_err(|err| {
        format!(
            "Failed to connect to daemon socket {}: {}",
            socket.display(),
            err
        )
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
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
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgedock_protocol::ErrorInfo;
    use std::io::{BufRead, BufReader};
    use std::os::unix::net::UnixListener;
    use std::thread;

    /// Accepts one connection, hands the parsed request to `reply`, and writes
    /// whatever it returns.
    fn serve_once<F>(listener: UnixListener, reply: F) -> thread::JoinHandle<Request>
    where
        F: FnOnce(&Request) -> Vec<u8> + Send + 'static,
    {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut line = String::new();
            BufReader::new(&mut stream)
                .read_line(&mut line)
                .expect("read request");
            let request: Request = serde_json::from_str(&line).expect("parse request");
            stream.write_all(&reply(&request)).expect("write reply");
            request
        })
    }

    fn encode(response: &Response) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(response).expect("encode");
        bytes.push(b'\n');
        bytes
    }

    #[test]
    fn call_returns_payload_on_success() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("daemon.sock");
        let server = serve_once(UnixListener::bind(&socket).expect("bind"), |request| {
            encode(&Response::ok(
                request.id.clone(),
                serde_json::json!({ "full_screen": true }),
            ))
        });

        let data = call(&socket, Method::ToggleFullScreen, None).expect("call");
        assert_eq!(data["full_screen"], true);

        let request = server.join().expect("server");
        assert_eq!(request.method, Method::ToggleFullScreen);
        assert_eq!(request.protocol_version, PROTOCOL_VERSION);
        assert!(request.id.is_some());
    }

    #[test]
    fn call_surfaces_daemon_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("daemon.sock");
        let server = serve_once(UnixListener::bind(&socket).expect("bind"), |request| {
            encode(&Response::error_with_info(
                request.id.clone(),
                ErrorInfo::new("unknown_dock", "no dock is configured at the left edge"),
            ))
        });

        let err = call(
            &socket,
            Method::Touch,
            Some(serde_json::json!({ "position": "left" })),
        )
        .expect_err("daemon error");
        assert_eq!(err, "unknown_dock: no dock is configured at the left edge");
        server.join().expect("server");
    }

    #[test]
    fn empty_reply_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("daemon.sock");
        let server = serve_once(UnixListener::bind(&socket).expect("bind"), |_| Vec::new());

        let err = call(&socket, Method::GetHealth, None).expect_err("empty");
        assert!(err.contains("empty"), "unexpected error: {err}");
        server.join().expect("server");
    }

    #[test]
    fn missing_socket_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = call(&dir.path().join("absent.sock"), Method::GetHealth, None)
            .expect_err("no daemon");
        assert!(err.starts_with("Failed to connect"));
    }
}
