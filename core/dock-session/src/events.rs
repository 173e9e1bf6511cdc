//! Observability hook for session transitions.
//!
//! Sessions never write to the console themselves; they emit [`SessionEvent`]s
//! into an injected [`EventSink`]. The default sink forwards to `tracing`.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Inactive -> Active; the activation effect was dispatched.
    Activated,
    /// Touched while active; the idle countdown restarted.
    Prolonged,
    /// Touched while blocked; ignored.
    Suppressed { blocks: usize },
    Blocked { token: String, blocks: usize },
    Unblocked { token: String, blocks: usize },
    /// A deactivation check fired and is consulting the predicate.
    CheckStarted { generation: u64 },
    /// The predicate said "not yet"; another check was armed.
    CheckDeferred { generation: u64, rechecks: u64 },
    /// Active -> Inactive; the deactivation effect was dispatched.
    Deactivated,
    /// A check fired after being superseded and did nothing.
    StaleCheck { generation: u64 },
    PredicateFailed { message: String },
    SchedulerFailed { message: String },
    DispatcherFailed { message: String },
    Disposed,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, session: &str, event: &SessionEvent);
}

/// Default sink: structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, session: &str, event: &SessionEvent) {
        match event {
            SessionEvent::Activated => tracing::info!(session, "Dock session activated"),
            SessionEvent::Deactivated => tracing::info!(session, "Dock session finished"),
            SessionEvent::Prolonged => tracing::trace!(session, "Dock session prolonged"),
            SessionEvent::Suppressed { blocks } => {
                tracing::trace!(session, blocks, "Touch suppressed while blocked")
            }
            SessionEvent::Blocked { token, blocks } => {
                tracing::debug!(session, token = %token, blocks, "Dock session blocked")
            }
            SessionEvent::Unblocked { token, blocks } => {
                tracing::debug!(session, token = %token, blocks, "Dock session unblocked")
            }
            SessionEvent::CheckStarted { generation } => {
                tracing::trace!(session, generation, "Deactivation check started")
            }
            SessionEvent::CheckDeferred {
                generation,
                rechecks,
            } => tracing::debug!(
                session,
                generation,
                rechecks,
                "Dock session prolonged by predicate"
            ),
            SessionEvent::StaleCheck { generation } => {
                tracing::trace!(session, generation, "Stale deactivation check ignored")
            }
            SessionEvent::PredicateFailed { message } => tracing::warn!(
                session,
                error = %message,
                "Dismissal predicate failed; keeping dock visible"
            ),
            SessionEvent::SchedulerFailed { message } => tracing::error!(
                session,
                error = %message,
                "Scheduler failed; dock session faulted"
            ),
            SessionEvent::DispatcherFailed { message } => tracing::error!(
                session,
                error = %message,
                "Dispatcher refused an effect; dock session faulted"
            ),
            SessionEvent::Disposed => tracing::debug!(session, "Dock session disposed"),
        }
    }
}

/// Captures events in memory, for assertions and status reporting.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, SessionEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, event)| predicate(event))
            .count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, session: &str, event: &SessionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((session.to_string(), event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_counts_matching_events() {
        let sink = RecordingSink::new();
        sink.emit("dock-session-top", &SessionEvent::Activated);
        sink.emit("dock-session-top", &SessionEvent::Prolonged);
        sink.emit("dock-session-top", &SessionEvent::Prolonged);

        assert_eq!(sink.count(|e| matches!(e, SessionEvent::Prolonged)), 2);
        assert_eq!(sink.events().first(), Some(&SessionEvent::Activated));

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn events_serialize_with_tag() {
        let value = serde_json::to_value(SessionEvent::Blocked {
            token: "menu".to_string(),
            blocks: 1,
        })
        .expect("serialize");
        assert_eq!(value["event"], "blocked");
        assert_eq!(value["token"], "menu");
    }
}
