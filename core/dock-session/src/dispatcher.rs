//! Serialized execution context for visible effects (show/hide).
//!
//! A dispatcher stands in for a UI thread: effects run one at a time, in the
//! order they were dispatched. `dispatch` only enqueues; the session calls it
//! while holding its lock so effect order always matches transition order.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::{DockError, Result};

pub type Effect = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, effect: Effect) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single worker thread draining a FIFO channel.
pub struct QueueDispatcher {
    name: String,
    sender: Mutex<Option<Sender<Effect>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueueDispatcher {
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Effect>();
        let thread_name = name.clone();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for effect in receiver {
                    if catch_unwind(AssertUnwindSafe(effect)).is_err() {
                        tracing::error!(dispatcher = %thread_name, "Dispatched effect panicked");
                    }
                }
            })
            .map_err(|err| {
                DockError::DispatcherClosed(format!(
                    "failed to spawn dispatcher thread {}: {}",
                    name, err
                ))
            })?;

        tracing::debug!(dispatcher = %name, "Dispatcher thread started");
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `false` once `shutdown` has closed the queue.
    pub fn is_running(&self) -> bool {
        lock(&self.sender).is_some()
    }

    /// Closes the queue, lets already-dispatched effects finish, and joins the
    /// worker unless called from the worker itself.
    pub fn shutdown(&self) -> Result<()> {
        lock(&self.sender).take();
        let Some(worker) = lock(&self.worker).take() else {
            return Ok(());
        };
        if worker.thread().id() == thread::current().id() {
            return Ok(());
        }
        worker.join().map_err(|_| {
            DockError::DispatcherClosed(format!("dispatcher thread {} panicked", self.name))
        })?;
        tracing::debug!(dispatcher = %self.name, "Dispatcher thread stopped");
        Ok(())
    }
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, effect: Effect) -> Result<()> {
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(DockError::DispatcherClosed(self.name.clone()));
        };
        sender
            .send(effect)
            .map_err(|_| DockError::DispatcherClosed(self.name.clone()))
    }
}

impl Drop for QueueDispatcher {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(dispatcher = %self.name, error = %err, "Dispatcher shutdown failed on drop");
        }
    }
}

#[derive(Default)]
struct ManualQueue {
    effects: VecDeque<Effect>,
    closed: bool,
}

/// Queues effects until [`ManualDispatcher::run_pending`] drains them on the
/// calling thread.
#[derive(Default)]
pub struct ManualDispatcher {
    queue: Mutex<ManualQueue>,
}

impl ManualDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        lock(&self.queue).effects.len()
    }

    pub fn close(&self) {
        lock(&self.queue).closed = true;
    }

    /// Runs queued effects in order, including ones dispatched while draining.
    /// Returns the number of effects run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = lock(&self.queue).effects.pop_front();
            match next {
                Some(effect) => {
                    effect();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Dispatcher for ManualDispatcher {
    fn dispatch(&self, effect: Effect) -> Result<()> {
        let mut queue = lock(&self.queue);
        if queue.closed {
            return Err(DockError::DispatcherClosed("manual dispatcher".to_string()));
        }
        queue.effects.push_back(effect);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn queue_dispatcher_preserves_dispatch_order() {
        let dispatcher = QueueDispatcher::spawn("test-effects").expect("spawn");
        let (tx, rx) = mpsc::channel();
        for index in 0..20 {
            let tx = tx.clone();
            dispatcher
                .dispatch(Box::new(move || {
                    let _ = tx.send(index);
                }))
                .expect("dispatch");
        }

        let seen: Vec<_> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).expect("effect ran"))
            .collect();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn queue_dispatcher_runs_effects_on_one_thread() {
        let dispatcher = QueueDispatcher::spawn("test-single").expect("spawn");
        let (tx, rx) = mpsc::channel();
        for _ in 0..3 {
            let tx = tx.clone();
            dispatcher
                .dispatch(Box::new(move || {
                    let _ = tx.send(thread::current().name().map(str::to_string));
                }))
                .expect("dispatch");
        }
        for _ in 0..3 {
            let name = rx.recv_timeout(Duration::from_secs(2)).expect("effect ran");
            assert_eq!(name.as_deref(), Some("test-single"));
        }
    }

    #[test]
    fn queue_dispatcher_drains_before_shutdown_and_rejects_after() {
        let dispatcher = QueueDispatcher::spawn("test-drain").expect("spawn");
        let (tx, rx) = mpsc::channel();
        dispatcher
            .dispatch(Box::new(move || {
                thread::sleep(Duration::from_millis(20));
                let _ = tx.send(());
            }))
            .expect("dispatch");
        assert!(dispatcher.is_running());
        dispatcher.shutdown().expect("shutdown");
        rx.try_recv().expect("effect finished before shutdown returned");
        assert!(!dispatcher.is_running());

        let err = dispatcher.dispatch(Box::new(|| {})).expect_err("closed");
        assert!(matches!(err, DockError::DispatcherClosed(_)));
    }

    #[test]
    fn queue_dispatcher_keeps_draining_after_panic() {
        let dispatcher = QueueDispatcher::spawn("test-panic-effect").expect("spawn");
        let (tx, rx) = mpsc::channel();
        dispatcher
            .dispatch(Box::new(|| panic!("effect failed")))
            .expect("dispatch");
        dispatcher
            .dispatch(Box::new(move || {
                let _ = tx.send(());
            }))
            .expect("dispatch");
        rx.recv_timeout(Duration::from_secs(2))
            .expect("later effect ran");
    }

    #[test]
    fn manual_dispatcher_runs_nested_dispatches() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let inner = Arc::clone(&dispatcher);
        let (tx, rx) = mpsc::channel();
        let inner_tx = tx.clone();
        dispatcher
            .dispatch(Box::new(move || {
                let _ = tx.send("outer");
                inner
                    .dispatch(Box::new(move || {
                        let _ = inner_tx.send("inner");
                    }))
                    .expect("nested dispatch");
            }))
            .expect("dispatch");

        assert_eq!(dispatcher.run_pending(), 2);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["outer", "inner"]);
    }

    #[test]
    fn manual_dispatcher_rejects_after_close() {
        let dispatcher = ManualDispatcher::new();
        dispatcher.close();
        assert!(dispatcher.dispatch(Box::new(|| {})).is_err());
    }
}
