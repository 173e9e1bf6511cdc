//! Docks hosted by the daemon: one activity session per configured screen edge.
//!
//! Each dock carries two flags besides its session. `visible` is written only
//! by effects running on the shared dispatcher thread. `pointer_inside` is
//! written by `pointer` requests and read by the dismissal predicate, so a dock
//! never hides from under the pointer.

use chrono::{DateTime, Utc};
use edgedock_protocol::{BlockParams, ErrorInfo, PointerParams, TouchParams, TouchSource};
use edgedock_session::{
    load_config, Dispatcher, DockConfig, DockError, DockPosition, DockSession, ExitBehavior,
    Orientation, QueueDispatcher, SessionEffects, SessionSettings, SessionSnapshot,
    WeakDockSession,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, info, warn};

const DISPATCHER_NAME: &str = "dock-effects";

#[derive(Clone)]
struct DockHandle {
    position: DockPosition,
    session: DockSession,
    visible: Arc<AtomicBool>,
    pointer_inside: Arc<AtomicBool>,
}

#[derive(Debug, Serialize)]
pub struct DockStatus {
    pub position: DockPosition,
    pub orientation: Orientation,
    pub visible: bool,
    pub pointer_inside: bool,
    pub session: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub struct DaemonStatus {
    pub full_screen: bool,
    pub exit_behavior: ExitBehavior,
    pub debounce_ms: u64,
    pub config_loaded_at: DateTime<Utc>,
    pub docks: Vec<DockStatus>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: Vec<DockPosition>,
    pub removed: Vec<DockPosition>,
    pub kept: Vec<DockPosition>,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The caller should stop the process once the reply is written.
    Shutdown,
    /// Every dock was hidden; the daemon keeps serving.
    Hidden,
}

struct LoadedConfig {
    config: DockConfig,
    loaded_at: DateTime<Utc>,
}

pub struct DockRegistry {
    dispatcher: Arc<QueueDispatcher>,
    config_path: Option<PathBuf>,
    config: Mutex<LoadedConfig>,
    docks: Mutex<BTreeMap<DockPosition, DockHandle>>,
    full_screen: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DockRegistry {
    /// Starts the effect dispatcher and opens a session for every configured
    /// position. `config_path` is remembered for `reload`.
    pub fn start(config: DockConfig, config_path: Option<PathBuf>) -> Result<Self, DockError> {
        let dispatcher = Arc::new(QueueDispatcher::spawn(DISPATCHER_NAME)?);
        let mut docks = BTreeMap::new();
        for position in &config.docks.positions {
            let handle = open_dock(*position, &config.session, &dispatcher)?;
            docks.insert(*position, handle);
        }
        info!(
            docks = docks.len(),
            debounce_ms = config.session.debounce_ms,
            "Dock sessions started"
        );

        Ok(Self {
            dispatcher,
            config_path,
            config: Mutex::new(LoadedConfig {
                config,
                loaded_at: Utc::now(),
            }),
            docks: Mutex::new(docks),
            full_screen: AtomicBool::new(false),
        })
    }

    /// Returns `false` when the touch was ignored (fold touches in full-screen
    /// mode).
    pub fn touch(&self, params: &TouchParams) -> Result<bool, ErrorInfo> {
        if params.source == TouchSource::Fold && self.full_screen.load(Ordering::SeqCst) {
            debug!(position = %params.position, "Fold touch ignored in full-screen mode");
            return Ok(false);
        }
        let handle = self.dock(params.position)?;
        handle.session.touch()?;
        Ok(true)
    }

    pub fn block(&self, params: &BlockParams) -> Result<(), ErrorInfo> {
        let handle = self.dock(params.position)?;
        handle.session.block(params.token.as_str())?;
        Ok(())
    }

    pub fn unblock(&self, params: &BlockParams) -> Result<(), ErrorInfo> {
        let handle = self.dock(params.position)?;
        handle.session.unblock(&params.token)?;
        Ok(())
    }

    /// Records whether the pointer is over the dock. Entering counts as
    /// activity.
    pub fn pointer(&self, params: &PointerParams) -> Result<(), ErrorInfo> {
        let handle = self.dock(params.position)?;
        handle
            .pointer_inside
            .store(params.inside, Ordering::SeqCst);
        if params.inside {
            handle.session.touch()?;
        }
        Ok(())
    }

    /// Flips full-screen mode and returns the new value.
    pub fn toggle_full_screen(&self) -> bool {
        let enabled = !self.full_screen.fetch_xor(true, Ordering::SeqCst);
        info!(enabled, "Full-screen mode toggled");
        enabled
    }

    pub fn exit_behavior(&self) -> ExitBehavior {
        lock(&self.config).config.daemon.exit_behavior
    }

    /// Re-reads the settings file. On failure the running configuration is
    /// left untouched: new docks are opened before any running dock changes.
    pub fn reload(&self) -> Result<ReloadSummary, DockError> {
        let config = load_config(self.config_path.clone())?;
        let mut docks = lock(&self.docks);
        if !self.dispatcher.is_running() {
            return Err(DockError::DispatcherClosed(
                self.dispatcher.name().to_string(),
            ));
        }

        let mut opened = Vec::new();
        for position in &config.docks.positions {
            if docks.contains_key(position) {
                continue;
            }
            match open_dock(*position, &config.session, &self.dispatcher) {
                Ok(handle) => opened.push(handle),
                Err(err) => {
                    for handle in &opened {
                        if let Err(dispose_err) = handle.session.dispose() {
                            warn!(position = %handle.position, error = %dispose_err, "Failed to discard new dock");
                        }
                    }
                    return Err(err);
                }
            }
        }

        let summary = ReloadSummary {
            added: opened.iter().map(|handle| handle.position).collect(),
            removed: docks
                .keys()
                .filter(|position| !config.docks.positions.contains(position))
                .copied()
                .collect(),
            kept: config
                .docks
                .positions
                .iter()
                .filter(|position| docks.contains_key(position))
                .copied()
                .collect(),
            debounce_ms: config.session.debounce_ms,
        };

        for position in &summary.kept {
            if let Some(handle) = docks.get(position) {
                if let Err(err) = handle.session.set_debounce(config.session.debounce()) {
                    warn!(position = %position, error = %err, "Failed to apply new debounce");
                }
            }
        }
        for position in &summary.removed {
            if let Some(handle) = docks.remove(position) {
                if let Err(err) = self.retire(&handle) {
                    warn!(position = %position, error = %err, "Failed to retire dock");
                }
            }
        }
        for handle in opened {
            docks.insert(handle.position, handle);
        }
        drop(docks);

        *lock(&self.config) = LoadedConfig {
            config,
            loaded_at: Utc::now(),
        };
        info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            kept = summary.kept.len(),
            debounce_ms = summary.debounce_ms,
            "Configuration reloaded"
        );
        Ok(summary)
    }

    /// Applies the configured exit behavior. `Shutdown` is left to the caller
    /// so the reply can be written first.
    pub fn exit(&self) -> Result<ExitOutcome, DockError> {
        match self.exit_behavior() {
            ExitBehavior::Shutdown => Ok(ExitOutcome::Shutdown),
            ExitBehavior::Hide => {
                self.hide_all()?;
                Ok(ExitOutcome::Hidden)
            }
        }
    }

    /// Hides every dock and starts each one over with a fresh session.
    fn hide_all(&self) -> Result<(), DockError> {
        let settings = lock(&self.config).config.session.clone();
        let mut docks = lock(&self.docks);
        for handle in docks.values_mut() {
            self.retire(handle)?;
            *handle = open_dock(handle.position, &settings, &self.dispatcher)?;
        }
        info!(docks = docks.len(), "All docks hidden");
        Ok(())
    }

    /// Disposes every session, then drains and stops the dispatcher.
    pub fn shutdown(&self) -> Result<(), DockError> {
        let handles: Vec<DockHandle> = lock(&self.docks).values().cloned().collect();
        for handle in &handles {
            if let Err(err) = handle.session.dispose() {
                warn!(position = %handle.position, error = %err, "Failed to dispose dock session");
            }
        }
        self.dispatcher.shutdown()?;
        info!(docks = handles.len(), "Dock sessions stopped");
        Ok(())
    }

    pub fn status(&self) -> DaemonStatus {
        let (exit_behavior, debounce_ms, config_loaded_at) = {
            let loaded = lock(&self.config);
            (
                loaded.config.daemon.exit_behavior,
                loaded.config.session.debounce_ms,
                loaded.loaded_at,
            )
        };
        let docks = lock(&self.docks)
            .values()
            .map(|handle| DockStatus {
                position: handle.position,
                orientation: handle.position.orientation(),
                visible: handle.visible.load(Ordering::SeqCst),
                pointer_inside: handle.pointer_inside.load(Ordering::SeqCst),
                session: handle.session.snapshot(),
            })
            .collect();

        DaemonStatus {
            full_screen: self.full_screen.load(Ordering::SeqCst),
            exit_behavior,
            debounce_ms,
            config_loaded_at,
            docks,
        }
    }

    pub fn dock_count(&self) -> usize {
        lock(&self.docks).len()
    }

    pub fn is_full_screen(&self) -> bool {
        self.full_screen.load(Ordering::SeqCst)
    }

    fn dock(&self, position: DockPosition) -> Result<DockHandle, ErrorInfo> {
        lock(&self.docks).get(&position).cloned().ok_or_else(|| {
            ErrorInfo::new(
                "unknown_dock",
                format!("no dock is configured at the {} edge", position),
            )
        })
    }

    /// Disposes the session and hides the dock. The hide goes through the
    /// dispatcher because disposal drops the session's own queued effects.
    fn retire(&self, handle: &DockHandle) -> Result<(), DockError> {
        handle.session.dispose()?;
        let visible = Arc::clone(&handle.visible);
        let position = handle.position;
        self.dispatcher.dispatch(Box::new(move || {
            if visible.swap(false, Ordering::SeqCst) {
                info!(position = %position, "Dock hidden");
            }
        }))
    }
}

fn open_dock(
    position: DockPosition,
    settings: &SessionSettings,
    dispatcher: &Arc<QueueDispatcher>,
) -> Result<DockHandle, DockError> {
    let visible = Arc::new(AtomicBool::new(false));
    let pointer_inside = Arc::new(AtomicBool::new(false));
    let own_session: Arc<OnceLock<WeakDockSession>> = Arc::new(OnceLock::new());

    let effects = {
        let shown = Arc::clone(&visible);
        let hidden = Arc::clone(&visible);
        let hovered = Arc::clone(&pointer_inside);
        let occupied = Arc::clone(&pointer_inside);
        let own_session = Arc::clone(&own_session);
        SessionEffects::new(
            move || {
                if !shown.swap(true, Ordering::SeqCst) {
                    info!(position = %position, "Dock shown");
                }
            },
            move || {
                // The pointer came back after the check passed.
                if hovered.load(Ordering::SeqCst) {
                    if let Some(session) = own_session.get().and_then(WeakDockSession::upgrade) {
                        if let Err(err) = session.touch() {
                            debug!(position = %position, error = %err, "Re-touch after hide skipped");
                        }
                    }
                    return;
                }
                if hidden.swap(false, Ordering::SeqCst) {
                    info!(position = %position, "Dock hidden");
                }
            },
            move || !occupied.load(Ordering::SeqCst),
        )
    };

    let dispatcher: Arc<dyn Dispatcher> = dispatcher.clone();
    let session = DockSession::for_position(position, settings, effects, dispatcher)?;
    let _ = own_session.set(session.downgrade());

    Ok(DockHandle {
        position,
        session,
        visible,
        pointer_inside,
    })
}
