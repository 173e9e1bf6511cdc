//! # edgedock-session
//!
//! Activity session controller for edgedock, a reveal-on-hover dock pinned to
//! a screen edge that hides itself after inactivity.
//!
//! ## Design Principles
//!
//! - **Synchronous**: plain threads, no async runtime. A session owns one timer
//!   thread; visible effects run on an injected single-threaded dispatcher.
//! - **Thread-safe**: `touch`, `block`, `unblock` and `dispose` may be called
//!   from any thread, including from the session's own effects and predicate.
//! - **Fail visible**: predicate failures keep the dock shown; runtime failures
//!   fault the session instead of guessing.
//! - **No global side effects**: transitions are reported through an injected
//!   [`EventSink`]; the library never installs a tracing subscriber.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use edgedock_session::{DockPosition, DockSession, QueueDispatcher, SessionEffects, SessionSettings};
//! use std::sync::Arc;
//!
//! let ui = Arc::new(QueueDispatcher::spawn("ui")?);
//! let effects = SessionEffects::new(show_dock, hide_dock, || !pointer_over_dock());
//! let session = DockSession::for_position(DockPosition::Bottom, &SessionSettings::default(), effects, ui)?;
//!
//! session.touch()?;              // pointer entered the fold
//! session.block("context-menu")?; // menu opened
//! session.unblock("context-menu")?;
//! session.dispose()?;
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod position;
pub mod predicate;
pub mod scheduler;
pub mod session;

pub use config::{
    default_config_path, load_config, DaemonSettings, DockConfig, DocksSettings, ExitBehavior,
    SessionSettings, DEFAULT_DEBOUNCE_MS,
};
pub use dispatcher::{Dispatcher, Effect, ManualDispatcher, QueueDispatcher};
pub use error::{DockError, Result};
pub use events::{EventSink, RecordingSink, SessionEvent, TracingSink};
pub use position::{DockPosition, Orientation};
pub use predicate::{DismissalCheck, Fallible, Verdict};
pub use scheduler::{ManualScheduler, Scheduler, Task, TaskHandle, ThreadScheduler};
pub use session::{
    Callback, DockSession, SessionEffects, SessionRuntime, SessionSnapshot, SessionState,
    WeakDockSession,
};
