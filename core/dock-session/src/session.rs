//! The dock activity session.
//!
//! A session decides when its dock is shown, kept shown, or hidden. Stimuli
//! (`touch`, `block`, `unblock`) arrive from any thread; a single scheduled
//! check per session asks the dismissal predicate whether the dock may hide.
//!
//! ## Locking
//!
//! All state lives behind one mutex. Nothing external runs under it: effects
//! go through the dispatcher (enqueue only), the predicate is evaluated with
//! the lock released, and events are emitted after the lock is dropped. Every
//! arm or cancel bumps a generation counter; a check that fires with an old
//! generation, or whose generation moved while the predicate ran, does nothing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::config::SessionSettings;
use crate::dispatcher::{Dispatcher, Effect};
use crate::error::{DockError, Result};
use crate::events::{EventSink, SessionEvent, TracingSink};
use crate::position::DockPosition;
use crate::predicate::{self, DismissalCheck, Verdict};
use crate::scheduler::{Scheduler, TaskHandle, ThreadScheduler};

pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// The collaborator side of a session: what to do on show/hide, and when
/// hiding is allowed.
#[derive(Clone)]
pub struct SessionEffects {
    pub on_activate: Callback,
    pub on_deactivate: Callback,
    pub can_dismiss: Arc<dyn DismissalCheck>,
}

impl SessionEffects {
    pub fn new(
        on_activate: impl Fn() + Send + Sync + 'static,
        on_deactivate: impl Fn() + Send + Sync + 'static,
        can_dismiss: impl DismissalCheck + 'static,
    ) -> Self {
        Self {
            on_activate: Arc::new(on_activate),
            on_deactivate: Arc::new(on_deactivate),
            can_dismiss: Arc::new(can_dismiss),
        }
    }
}

/// Execution resources a session runs on.
#[derive(Clone)]
pub struct SessionRuntime {
    pub scheduler: Arc<dyn Scheduler>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub events: Arc<dyn EventSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Inactive,
    Active,
    Disposed,
    Faulted,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub name: String,
    pub state: SessionState,
    /// Held block tokens, one entry per outstanding block.
    pub blocks: Vec<String>,
    pub debounce_ms: u64,
    pub check_pending: bool,
    pub generation: u64,
    pub activations: u64,
    pub deactivations: u64,
    pub rechecks: u64,
    pub stale_checks: u64,
    pub last_transition_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    activations: u64,
    deactivations: u64,
    rechecks: u64,
    stale_checks: u64,
}

struct Inner {
    state: SessionState,
    debounce: Duration,
    generation: u64,
    pending: Option<TaskHandle>,
    blocks: BTreeMap<String, usize>,
    counters: Counters,
    last_transition_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn block_count(&self) -> usize {
        self.blocks.values().sum()
    }

    /// A check armed with `generation` may still act.
    fn is_current(&self, generation: u64) -> bool {
        self.state == SessionState::Active
            && self.generation == generation
            && self.blocks.is_empty()
    }

    fn transition(&mut self, state: SessionState) {
        self.state = state;
        self.last_transition_at = Some(Utc::now());
    }
}

struct Shared {
    name: String,
    effects: SessionEffects,
    runtime: SessionRuntime,
    /// Set when the session spawned its scheduler; only then does `dispose`
    /// shut it down.
    owns_scheduler: bool,
    disposed: Arc<AtomicBool>,
    inner: Mutex<Inner>,
}

/// Shared handle to one dock's activity session.
///
/// Clones refer to the same session, so callbacks may hold a clone and
/// re-enter it (e.g. a hide effect that touches again when the pointer is
/// back over the dock).
#[derive(Clone)]
pub struct DockSession {
    shared: Arc<Shared>,
}

/// Non-owning handle, for effects that need to reach their own session
/// without keeping it alive.
#[derive(Clone)]
pub struct WeakDockSession {
    shared: Weak<Shared>,
}

impl WeakDockSession {
    pub fn upgrade(&self) -> Option<DockSession> {
        self.shared.upgrade().map(|shared| DockSession { shared })
    }
}

impl std::fmt::Debug for DockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockSession")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl DockSession {
    /// Creates a session with its own timer thread, named after the session.
    pub fn new(
        name: impl Into<String>,
        settings: &SessionSettings,
        effects: SessionEffects,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        let name = name.into();
        check_debounce(&name, settings.debounce())?;
        let scheduler = ThreadScheduler::spawn(name.clone())?;
        let runtime = SessionRuntime {
            scheduler: Arc::new(scheduler),
            dispatcher,
            events: Arc::new(TracingSink),
        };
        Self::build(name, settings, effects, runtime, true)
    }

    pub fn for_position(
        position: DockPosition,
        settings: &SessionSettings,
        effects: SessionEffects,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        Self::new(position.session_name(), settings, effects, dispatcher)
    }

    /// Runs the session on caller-provided resources. The scheduler stays the
    /// caller's: `dispose` cancels this session's check but leaves the
    /// scheduler running, so one scheduler may serve several sessions.
    pub fn with_runtime(
        name: impl Into<String>,
        settings: &SessionSettings,
        effects: SessionEffects,
        runtime: SessionRuntime,
    ) -> Result<Self> {
        Self::build(name.into(), settings, effects, runtime, false)
    }

    fn build(
        name: String,
        settings: &SessionSettings,
        effects: SessionEffects,
        runtime: SessionRuntime,
        owns_scheduler: bool,
    ) -> Result<Self> {
        check_debounce(&name, settings.debounce())?;
        Ok(Self {
            shared: Arc::new(Shared {
                name,
                effects,
                runtime,
                owns_scheduler,
                disposed: Arc::new(AtomicBool::new(false)),
                inner: Mutex::new(Inner {
                    state: SessionState::Inactive,
                    debounce: settings.debounce(),
                    generation: 0,
                    pending: None,
                    blocks: BTreeMap::new(),
                    counters: Counters::default(),
                    last_transition_at: None,
                }),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn downgrade(&self) -> WeakDockSession {
        WeakDockSession {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Records activity: shows the dock if hidden, otherwise restarts the idle
    /// countdown. Ignored while any block is held.
    pub fn touch(&self) -> Result<()> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.shared.lock();
            self.shared
                .ensure_usable(&inner)
                .and_then(|_| self.shared.touch_locked(&mut inner, &mut events))
        };
        self.shared.emit_all(events);
        result
    }

    /// Suspends auto-hide until `token` is unblocked. Cancels any pending check
    /// before returning; the visible state does not change.
    pub fn block(&self, token: impl Into<String>) -> Result<()> {
        let token = token.into();
        let mut events = Vec::new();
        let result = {
            let mut inner = self.shared.lock();
            self.shared.ensure_usable(&inner).map(|_| {
                self.shared.cancel_pending(&mut inner);
                *inner.blocks.entry(token.clone()).or_insert(0) += 1;
                events.push(SessionEvent::Blocked {
                    token,
                    blocks: inner.block_count(),
                });
            })
        };
        self.shared.emit_all(events);
        result
    }

    /// Releases one hold of `token`. When the last block goes away the session
    /// behaves as if touched.
    pub fn unblock(&self, token: &str) -> Result<()> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.shared.lock();
            self.shared
                .ensure_usable(&inner)
                .and_then(|_| self.shared.unblock_locked(&mut inner, token, &mut events))
        };
        self.shared.emit_all(events);
        result
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().state == SessionState::Active
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Takes effect the next time a check is armed. A zero debounce is
    /// rejected: a "not yet" predicate would re-arm without delay.
    pub fn set_debounce(&self, debounce: Duration) -> Result<()> {
        check_debounce(&self.shared.name, debounce)?;
        self.shared.lock().debounce = debounce;
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.lock();
        let blocks = inner
            .blocks
            .iter()
            .flat_map(|(token, count)| std::iter::repeat(token.clone()).take(*count))
            .collect();
        SessionSnapshot {
            name: self.shared.name.clone(),
            state: inner.state,
            blocks,
            debounce_ms: inner.debounce.as_millis() as u64,
            check_pending: inner.pending.is_some(),
            generation: inner.generation,
            activations: inner.counters.activations,
            deactivations: inner.counters.deactivations,
            rechecks: inner.counters.rechecks,
            stale_checks: inner.counters.stale_checks,
            last_transition_at: inner.last_transition_at,
        }
    }

    /// Cancels the pending check, drops queued effects of this session, and
    /// shuts the scheduler down if the session spawned it. Calling it again is
    /// a no-op.
    pub fn dispose(&self) -> Result<()> {
        {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Disposed {
                return Ok(());
            }
            self.shared.disposed.store(true, Ordering::SeqCst);
            self.shared.cancel_pending(&mut inner);
            inner.blocks.clear();
            inner.transition(SessionState::Disposed);
        }
        self.shared.emit(&SessionEvent::Disposed);
        if !self.shared.owns_scheduler {
            return Ok(());
        }
        // The timer thread may be blocked on our lock; shut down without it.
        self.shared.runtime.scheduler.shutdown()
    }
}

fn check_debounce(session: &str, debounce: Duration) -> Result<()> {
    if debounce.is_zero() {
        return Err(DockError::InvalidDebounce(session.to_string()));
    }
    Ok(())
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: &SessionEvent) {
        self.runtime.events.emit(&self.name, event);
    }

    fn emit_all(&self, events: Vec<SessionEvent>) {
        for event in &events {
            self.emit(event);
        }
    }

    fn ensure_usable(&self, inner: &Inner) -> Result<()> {
        match inner.state {
            SessionState::Disposed => Err(DockError::Disposed(self.name.clone())),
            SessionState::Faulted => Err(DockError::Faulted(self.name.clone())),
            SessionState::Inactive | SessionState::Active => Ok(()),
        }
    }

    fn cancel_pending(&self, inner: &mut Inner) {
        if let Some(handle) = inner.pending.take() {
            self.runtime.scheduler.cancel(handle);
        }
        inner.generation += 1;
    }

    fn touch_locked(
        self: &Arc<Self>,
        inner: &mut Inner,
        events: &mut Vec<SessionEvent>,
    ) -> Result<()> {
        if !inner.blocks.is_empty() {
            events.push(SessionEvent::Suppressed {
                blocks: inner.block_count(),
            });
            return Ok(());
        }

        match inner.state {
            SessionState::Inactive => {
                if let Err(err) = self.dispatch(&self.effects.on_activate) {
                    return Err(self.fault(inner, err, events));
                }
                inner.transition(SessionState::Active);
                inner.counters.activations += 1;
                events.push(SessionEvent::Activated);
                self.arm(inner, events)
            }
            SessionState::Active => {
                events.push(SessionEvent::Prolonged);
                self.arm(inner, events)
            }
            SessionState::Disposed | SessionState::Faulted => self.ensure_usable(inner),
        }
    }

    fn unblock_locked(
        self: &Arc<Self>,
        inner: &mut Inner,
        token: &str,
        events: &mut Vec<SessionEvent>,
    ) -> Result<()> {
        let Some(count) = inner.blocks.get_mut(token) else {
            return Err(DockError::UnknownBlock {
                session: self.name.clone(),
                token: token.to_string(),
            });
        };
        *count -= 1;
        if *count == 0 {
            inner.blocks.remove(token);
        }
        events.push(SessionEvent::Unblocked {
            token: token.to_string(),
            blocks: inner.block_count(),
        });

        if inner.blocks.is_empty() {
            self.touch_locked(inner, events)
        } else {
            Ok(())
        }
    }

    /// Replaces any pending check with a fresh one after the debounce delay.
    fn arm(self: &Arc<Self>, inner: &mut Inner, events: &mut Vec<SessionEvent>) -> Result<()> {
        self.cancel_pending(inner);
        let generation = inner.generation;
        let session = Arc::downgrade(self);
        let task = Box::new(move || {
            if let Some(session) = session.upgrade() {
                session.run_check(generation);
            }
        });

        match self.runtime.scheduler.schedule_once(inner.debounce, task) {
            Ok(handle) => {
                inner.pending = Some(handle);
                Ok(())
            }
            Err(err) => Err(self.fault(inner, err, events)),
        }
    }

    fn dispatch(&self, callback: &Callback) -> Result<()> {
        let callback = Arc::clone(callback);
        let disposed = Arc::clone(&self.disposed);
        let effect: Effect = Box::new(move || {
            if !disposed.load(Ordering::SeqCst) {
                callback();
            }
        });
        self.runtime.dispatcher.dispatch(effect)
    }

    /// Runtime failures break the show/hide guarantee; the session stops
    /// accepting stimuli. The dock is left as it is.
    fn fault(&self, inner: &mut Inner, err: DockError, events: &mut Vec<SessionEvent>) -> DockError {
        self.cancel_pending(inner);
        inner.transition(SessionState::Faulted);
        let message = err.to_string();
        events.push(match &err {
            DockError::DispatcherClosed(_) => SessionEvent::DispatcherFailed { message },
            _ => SessionEvent::SchedulerFailed { message },
        });
        err
    }

    fn run_check(self: &Arc<Self>, generation: u64) {
        {
            let mut inner = self.lock();
            if !inner.is_current(generation) {
                inner.counters.stale_checks += 1;
                drop(inner);
                self.emit(&SessionEvent::StaleCheck { generation });
                return;
            }
            // This task has fired; its handle is spent.
            inner.pending = None;
        }
        self.emit(&SessionEvent::CheckStarted { generation });

        let verdict = predicate::evaluate(self.effects.can_dismiss.as_ref());

        let mut events = Vec::new();
        if let Verdict::Failed(message) = &verdict {
            events.push(SessionEvent::PredicateFailed {
                message: message.clone(),
            });
        }

        {
            let mut inner = self.lock();
            if !inner.is_current(generation) {
                // Touched, blocked or disposed while the predicate ran.
                inner.counters.stale_checks += 1;
                events.push(SessionEvent::StaleCheck { generation });
            } else if verdict.allows_dismissal() {
                match self.dispatch(&self.effects.on_deactivate) {
                    Ok(()) => {
                        inner.generation += 1;
                        inner.transition(SessionState::Inactive);
                        inner.counters.deactivations += 1;
                        events.push(SessionEvent::Deactivated);
                    }
                    Err(err) => {
                        self.fault(&mut inner, err, &mut events);
                    }
                }
            } else {
                inner.counters.rechecks += 1;
                let rechecks = inner.counters.rechecks;
                if self.arm(&mut inner, &mut events).is_ok() {
                    events.push(SessionEvent::CheckDeferred {
                        generation: inner.generation,
                        rechecks,
                    });
                }
            }
        }
        self.emit_all(events);
    }
}
