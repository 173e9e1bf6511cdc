//! Error types for edgedock session operations.

use std::path::PathBuf;

/// All errors that can surface from a dock session or its runtime.
///
/// Misuse errors (`UnknownBlock`, `Disposed`) are programming mistakes on the
/// caller's side and are never swallowed. Runtime errors are fatal to the
/// session that hit them.
#[derive(Debug, thiserror::Error)]
pub enum DockError {
    // ─────────────────────────────────────────────────────────────────────
    // Session Misuse
    // ─────────────────────────────────────────────────────────────────────
    #[error("Block token not held by session {session}: {token}")]
    UnknownBlock { session: String, token: String },

    #[error("Session already disposed: {0}")]
    Disposed(String),

    #[error("Session faulted after a runtime failure: {0}")]
    Faulted(String),

    #[error("Debounce must be greater than zero for session {0}")]
    InvalidDebounce(String),

    // ─────────────────────────────────────────────────────────────────────
    // Runtime Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    #[error("Dispatcher closed: {0}")]
    DispatcherClosed(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("Configuration read failed: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Home directory not found")]
    HomeDirNotFound,
}

/// Convenience type alias for Results using DockError.
pub type Result<T> = std::result::Result<T, DockError>;

impl DockError {
    /// Stable machine-readable code, used on the IPC wire.
    pub fn code(&self) -> &'static str {
        match self {
            DockError::UnknownBlock { .. } => "unknown_block",
            DockError::Disposed(_) => "session_disposed",
            DockError::Faulted(_) => "session_faulted",
            DockError::InvalidDebounce(_) => "invalid_debounce",
            DockError::SchedulerUnavailable(_) => "scheduler_unavailable",
            DockError::DispatcherClosed(_) => "dispatcher_closed",
            DockError::ConfigMalformed { .. }
            | DockError::ConfigInvalid(_)
            | DockError::ConfigRead { .. }
            | DockError::HomeDirNotFound => "config_error",
        }
    }
}

// Conversion for string error compatibility
impl From<DockError> for String {
    fn from(err: DockError) -> String {
        err.to_string()
    }
}
