//! Delayed, cancellable single-shot task execution.
//!
//! The session arms its deactivation check through this trait. Implementations
//! must never run a task inline from `schedule_once`: the session calls it
//! while holding its own lock.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{DockError, Result};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifies one scheduled task. Handles are never reused by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

pub trait Scheduler: Send + Sync {
    /// Runs `task` once after `delay` on the scheduler's own context.
    fn schedule_once(&self, delay: Duration, task: Task) -> Result<TaskHandle>;

    /// Drops the task if it has not started. Safe for handles that already
    /// ran or were cancelled.
    fn cancel(&self, handle: TaskHandle);

    /// Drops all queued tasks and releases the underlying resource.
    fn shutdown(&self) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Thread-backed scheduler
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct TimerQueue {
    next_id: u64,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    tasks: HashMap<u64, Task>,
    shutting_down: bool,
}

#[derive(Default)]
struct TimerShared {
    queue: Mutex<TimerQueue>,
    wake: Condvar,
}

/// One named timer thread per scheduler.
///
/// Cancelled tasks are removed from the task table immediately; their heap
/// entries are skipped when they surface.
pub struct ThreadScheduler {
    name: String,
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadScheduler {
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let shared = Arc::new(TimerShared::default());
        let thread_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_timer_loop(thread_shared))
            .map_err(|err| {
                DockError::SchedulerUnavailable(format!(
                    "failed to spawn timer thread {}: {}",
                    name, err
                ))
            })?;

        tracing::debug!(scheduler = %name, "Timer thread started");
        Ok(Self {
            name,
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tasks that are queued and not cancelled.
    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).tasks.len()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) -> Result<TaskHandle> {
        let mut queue = lock(&self.shared.queue);
        if queue.shutting_down {
            return Err(DockError::SchedulerUnavailable(format!(
                "{} is shut down",
                self.name
            )));
        }
        let id = queue.next_id;
        queue.next_id += 1;
        queue.deadlines.push(Reverse((Instant::now() + delay, id)));
        queue.tasks.insert(id, task);
        drop(queue);

        self.shared.wake.notify_one();
        Ok(TaskHandle(id))
    }

    fn cancel(&self, handle: TaskHandle) {
        lock(&self.shared.queue).tasks.remove(&handle.0);
    }

    fn shutdown(&self) -> Result<()> {
        {
            let mut queue = lock(&self.shared.queue);
            if queue.shutting_down {
                return Ok(());
            }
            queue.shutting_down = true;
            queue.tasks.clear();
            queue.deadlines.clear();
        }
        self.shared.wake.notify_all();

        let Some(worker) = lock(&self.worker).take() else {
            return Ok(());
        };

        // A task may dispose its own session from the timer thread.
        if worker.thread().id() == thread::current().id() {
            return Ok(());
        }

        worker.join().map_err(|_| {
            DockError::SchedulerUnavailable(format!("timer thread {} panicked", self.name))
        })?;
        tracing::debug!(scheduler = %self.name, "Timer thread stopped");
        Ok(())
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(scheduler = %self.name, error = %err, "Timer shutdown failed on drop");
        }
    }
}

fn run_timer_loop(shared: Arc<TimerShared>) {
    let mut queue = lock(&shared.queue);
    loop {
        if queue.shutting_down {
            return;
        }

        let now = Instant::now();
        match queue.deadlines.peek().copied() {
            None => {
                queue = shared
                    .wake
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(Reverse((deadline, id))) if deadline <= now => {
                queue.deadlines.pop();
                let Some(task) = queue.tasks.remove(&id) else {
                    continue;
                };
                drop(queue);
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!(task = id, "Scheduled task panicked");
                }
                queue = lock(&shared.queue);
            }
            Some(Reverse((deadline, _))) => {
                let (guard, _) = shared
                    .wake
                    .wait_timeout(queue, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner);
                queue = guard;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Virtual-clock scheduler
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct ManualQueue {
    now: Duration,
    next_id: u64,
    tasks: HashMap<u64, (Duration, Task)>,
    shut_down: bool,
}

/// Deterministic scheduler driven by [`ManualScheduler::advance`].
///
/// Tasks run on the thread calling `advance`, in deadline order, with the
/// scheduler's lock released so they may schedule follow-ups.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<ManualQueue>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        lock(&self.queue).now
    }

    pub fn pending(&self) -> usize {
        lock(&self.queue).tasks.len()
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.queue).shut_down
    }

    /// Moves the clock forward, running every task whose deadline falls inside
    /// the window, including tasks scheduled by tasks run along the way.
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = lock(&self.queue).now + by;
        let mut ran = 0;
        loop {
            let task = {
                let mut queue = lock(&self.queue);
                let due = queue
                    .tasks
                    .iter()
                    .filter(|(_, (deadline, _))| *deadline <= target)
                    .map(|(id, (deadline, _))| (*deadline, *id))
                    .min();
                match due {
                    Some((deadline, id)) => {
                        queue.now = deadline;
                        queue.tasks.remove(&id).map(|(_, task)| task)
                    }
                    None => {
                        queue.now = target;
                        None
                    }
                }
            };
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) -> Result<TaskHandle> {
        let mut queue = lock(&self.queue);
        if queue.shut_down {
            return Err(DockError::SchedulerUnavailable(
                "manual scheduler is shut down".to_string(),
            ));
        }
        let id = queue.next_id;
        queue.next_id += 1;
        let deadline = queue.now + delay;
        queue.tasks.insert(id, (deadline, task));
        Ok(TaskHandle(id))
    }

    fn cancel(&self, handle: TaskHandle) {
        lock(&self.queue).tasks.remove(&handle.0);
    }

    fn shutdown(&self) -> Result<()> {
        let mut queue = lock(&self.queue);
        queue.shut_down = true;
        queue.tasks.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn thread_scheduler_runs_task_after_delay() {
        let scheduler = ThreadScheduler::spawn("test-timer").expect("spawn");
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        scheduler
            .schedule_once(
                Duration::from_millis(30),
                Box::new(move || {
                    let _ = tx.send(Instant::now());
                }),
            )
            .expect("schedule");

        let fired_at = rx.recv_timeout(Duration::from_secs(2)).expect("task ran");
        assert!(fired_at.duration_since(started) >= Duration::from_millis(30));
        scheduler.shutdown().expect("shutdown");
    }

    #[test]
    fn thread_scheduler_runs_tasks_in_deadline_order() {
        let scheduler = ThreadScheduler::spawn("test-order").expect("spawn");
        let (tx, rx) = mpsc::channel();
        for (label, delay) in [("late", 60), ("early", 10), ("middle", 35)] {
            let tx = tx.clone();
            scheduler
                .schedule_once(
                    Duration::from_millis(delay),
                    Box::new(move || {
                        let _ = tx.send(label);
                    }),
                )
                .expect("schedule");
        }

        let order: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).expect("task ran"))
            .collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
    }

    #[test]
    fn thread_scheduler_cancel_prevents_run() {
        let scheduler = ThreadScheduler::spawn("test-cancel").expect("spawn");
        let runs = Arc::new(AtomicUsize::new(0));
        let task_runs = Arc::clone(&runs);
        let handle = scheduler
            .schedule_once(
                Duration::from_millis(40),
                Box::new(move || {
                    task_runs.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("schedule");
        scheduler.cancel(handle);
        assert_eq!(scheduler.pending(), 0);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        // Cancelling again is harmless.
        scheduler.cancel(handle);
    }

    #[test]
    fn thread_scheduler_survives_panicking_task() {
        let scheduler = ThreadScheduler::spawn("test-panic").expect("spawn");
        let (tx, rx) = mpsc::channel();
        scheduler
            .schedule_once(Duration::from_millis(1), Box::new(|| panic!("boom")))
            .expect("schedule");
        scheduler
            .schedule_once(
                Duration::from_millis(20),
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .expect("schedule");
        rx.recv_timeout(Duration::from_secs(2))
            .expect("second task ran");
    }

    #[test]
    fn thread_scheduler_rejects_work_after_shutdown() {
        let scheduler = ThreadScheduler::spawn("test-shutdown").expect("spawn");
        scheduler.shutdown().expect("shutdown");
        scheduler.shutdown().expect("second shutdown is a no-op");
        let err = scheduler
            .schedule_once(Duration::from_millis(1), Box::new(|| {}))
            .expect_err("should fail");
        assert!(matches!(err, DockError::SchedulerUnavailable(_)));
    }

    #[test]
    fn manual_scheduler_runs_only_due_tasks() {
        let scheduler = ManualScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        for delay in [100, 300] {
            let runs = Arc::clone(&runs);
            scheduler
                .schedule_once(
                    Duration::from_millis(delay),
                    Box::new(move || {
                        runs.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .expect("schedule");
        }

        assert_eq!(scheduler.advance(Duration::from_millis(200)), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.now(), Duration::from_millis(200));
        assert_eq!(scheduler.pending(), 1);

        assert_eq!(scheduler.advance(Duration::from_millis(100)), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn manual_scheduler_runs_follow_up_tasks_inside_window() {
        let scheduler = Arc::new(ManualScheduler::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let inner_scheduler = Arc::clone(&scheduler);
        let inner_runs = Arc::clone(&runs);
        scheduler
            .schedule_once(
                Duration::from_millis(100),
                Box::new(move || {
                    inner_runs.fetch_add(1, Ordering::SeqCst);
                    let runs = Arc::clone(&inner_runs);
                    inner_scheduler
                        .schedule_once(
                            Duration::from_millis(100),
                            Box::new(move || {
                                runs.fetch_add(1, Ordering::SeqCst);
                            }),
                        )
                        .expect("nested schedule");
                }),
            )
            .expect("schedule");

        assert_eq!(scheduler.advance(Duration::from_millis(250)), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
