use edgedock_protocol::{Method, Request, Response, PROTOCOL_VERSION};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn write_config(home: &Path, body: &str) {
    let dir = home.join(".edgedock");
    std::fs::create_dir_all(&dir).expect("create config dir");
    std::fs::write(dir.join("edgedock.toml"), body).expect("write config");
}

fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_edgedockd"))
        .env("HOME", home)
        .env_remove("EDGEDOCK_CONFIG")
        .env_remove("EDGEDOCK_SOCKET")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn edgedockd")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".edgedock").join("daemon.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, method: Method, params: Option<Value>) -> Response {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(format!("{:?}", method)),
        params,
    };
    send_raw_request(
        socket,
        &serde_json::to_vec(&request).expect("Failed to serialize request"),
    )
}

fn send_raw_request(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    stream.write_all(payload).expect("Failed to write request");
    stream.write_all(b"\n").expect("Failed to write newline");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn bottom_visible(socket: &Path) -> bool {
    let status = send_request(socket, Method::GetStatus, None);
    assert!(status.ok, "status response was not ok");
    let data = status.data.expect("status payload");
    data["docks"]
        .as_array()
        .expect("docks array")
        .iter()
        .find(|dock| dock["position"] == "bottom")
        .and_then(|dock| dock["visible"].as_bool())
        .unwrap_or(false)
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(20));
    }
    condition()
}

fn error_code(response: &Response) -> &str {
    response
        .error
        .as_ref()
        .map(|error| error.code.as_str())
        .unwrap_or("missing")
}

#[test]
fn daemon_touch_status_and_hide_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_config(home.path(), "[session]\ndebounce_ms = 60\n");
    let socket = socket_path(home.path());
    let _guard = DaemonGuard {
        child: spawn_daemon(home.path()),
    };
    wait_for_socket(&socket, Duration::from_secs(3));

    let health = send_request(&socket, Method::GetHealth, None);
    assert!(health.ok, "health response was not ok");
    let data = health.data.expect("health payload");
    assert_eq!(data["status"], "ok");
    assert_eq!(data["docks"], 1);

    let touch = send_request(&socket, Method::Touch, Some(json!({"position": "bottom"})));
    assert!(touch.ok, "touch response was not ok");
    assert_eq!(touch.data.expect("touch payload")["applied"], true);
    assert!(wait_for(Duration::from_secs(2), || bottom_visible(&socket)));
    assert!(wait_for(Duration::from_secs(3), || !bottom_visible(&socket)));

    let status = send_request(&socket, Method::GetStatus, None);
    let data = status.data.expect("status payload");
    assert_eq!(data["docks"][0]["session"]["state"], "inactive");
    assert_eq!(data["docks"][0]["session"]["activations"], 1);
    assert_eq!(data["docks"][0]["session"]["deactivations"], 1);
}

#[test]
fn daemon_block_pointer_and_full_screen_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_config(home.path(), "[session]\ndebounce_ms = 40\n");
    let socket = socket_path(home.path());
    let _guard = DaemonGuard {
        child: spawn_daemon(home.path()),
    };
    wait_for_socket(&socket, Duration::from_secs(3));

    let full_screen = send_request(&socket, Method::ToggleFullScreen, None);
    assert_eq!(full_screen.data.expect("payload")["full_screen"], true);
    let fold = send_request(
        &socket,
        Method::Touch,
        Some(json!({"position": "bottom", "source": "fold"})),
    );
    assert_eq!(fold.data.expect("fold payload")["applied"], false);

    let menu = json!({"position": "bottom", "token": "CONTEXT_MENU_DOCK"});
    assert!(send_request(&socket, Method::Touch, Some(json!({"position": "bottom"}))).ok);
    assert!(send_request(&socket, Method::Block, Some(menu.clone())).ok);
    assert!(wait_for(Duration::from_secs(2), || bottom_visible(&socket)));
    sleep(Duration::from_millis(200));
    assert!(bottom_visible(&socket));
    assert!(send_request(&socket, Method::Unblock, Some(menu.clone())).ok);

    let pointer = send_request(
        &socket,
        Method::Pointer,
        Some(json!({"position": "bottom", "inside": true})),
    );
    assert!(pointer.ok, "pointer response was not ok");
    sleep(Duration::from_millis(200));
    assert!(bottom_visible(&socket));

    assert!(send_request(
        &socket,
        Method::Pointer,
        Some(json!({"position": "bottom", "inside": false})),
    )
    .ok);
    assert!(wait_for(Duration::from_secs(3), || !bottom_visible(&socket)));

    let stray = send_request(&socket, Method::Unblock, Some(menu));
    assert!(!stray.ok);
    assert_eq!(error_code(&stray), "unknown_block");
}

#[test]
fn daemon_rejects_bad_requests() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let socket = socket_path(home.path());
    let _guard = DaemonGuard {
        child: spawn_daemon(home.path()),
    };
    wait_for_socket(&socket, Duration::from_secs(3));

    let garbage = send_raw_request(&socket, b"{not json");
    assert_eq!(error_code(&garbage), "invalid_json");

    let mismatch = send_raw_request(
        &socket,
        br#"{"protocol_version": 99, "method": "get_health"}"#,
    );
    assert_eq!(error_code(&mismatch), "protocol_mismatch");

    let unknown_edge = send_request(&socket, Method::Touch, Some(json!({"position": "middle"})));
    assert_eq!(error_code(&unknown_edge), "invalid_params");

    let missing_dock = send_request(&socket, Method::Touch, Some(json!({"position": "left"})));
    assert_eq!(error_code(&missing_dock), "unknown_dock");

    let empty_token = send_request(
        &socket,
        Method::Block,
        Some(json!({"position": "bottom", "token": ""})),
    );
    assert_eq!(error_code(&empty_token), "invalid_token");
}

#[test]
fn daemon_reload_and_exit_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_config(home.path(), "[docks]\npositions = [\"bottom\"]\n");
    let socket = socket_path(home.path());
    let mut guard = DaemonGuard {
        child: spawn_daemon(home.path()),
    };
    wait_for_socket(&socket, Duration::from_secs(3));

    write_config(home.path(), "[docks]\npositions = [\"left\", \"bottom\"]\n");
    let reload = send_request(&socket, Method::Reload, None);
    assert!(reload.ok, "reload response was not ok");
    let summary = reload.data.expect("reload payload");
    assert_eq!(summary["added"], json!(["left"]));
    assert_eq!(summary["kept"], json!(["bottom"]));

    write_config(home.path(), "[session\n");
    let broken = send_request(&socket, Method::Reload, None);
    assert_eq!(error_code(&broken), "config_error");
    let health = send_request(&socket, Method::GetHealth, None);
    assert_eq!(health.data.expect("health payload")["docks"], 2);

    let exit = send_request(&socket, Method::Exit, None);
    assert!(exit.ok, "exit response was not ok");
    assert_eq!(exit.data.expect("exit payload")["exiting"], true);

    let deadline = Instant::now() + Duration::from_secs(3);
    let status = loop {
        if let Some(status) = guard.child.try_wait().expect("poll daemon") {
            break status;
        }
        assert!(Instant::now() < deadline, "daemon did not exit");
        sleep(Duration::from_millis(25));
    };
    assert!(status.success());
    assert!(!socket.exists());
}
