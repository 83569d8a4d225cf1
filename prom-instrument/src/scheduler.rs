//! A single background thread running housekeeping tasks.
//!
//! The worker thread is only spawned when the first task is scheduled. It is never joined on
//! process exit, so a scheduler does not keep the process alive.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::SchedulerError;

type Action = Box<dyn FnMut() + Send + 'static>;

enum Command {
    Schedule(Task),
    Cancel(u64),
    Shutdown,
}

struct Task {
    id: u64,
    next_run: Instant,
    /// `None` for tasks that run once.
    period: Option<Duration>,
    action: Action,
}

struct Worker {
    commands: Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Runs delayed and fixed-rate tasks on a lazily started background thread.
///
/// [`DefaultExemplarSampler`](crate::DefaultExemplarSampler) uses one to reopen its sampling
/// gate once the retention interval has passed.
pub struct Scheduler {
    thread_name: String,
    worker: OnceCell<Worker>,
    next_id: AtomicU64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a scheduler. No thread is started until a task is scheduled.
    pub fn new() -> Self {
        Self::with_thread_name("prom-instrument-scheduler")
    }

    /// Creates a scheduler whose worker thread has the given name.
    pub fn with_thread_name(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            worker: OnceCell::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Whether the worker thread has been started.
    pub fn is_started(&self) -> bool {
        self.worker.get().is_some()
    }

    /// Runs `action` every `period`, the first time after `initial_delay`.
    ///
    /// Runs that were missed because a previous run took too long are skipped rather than run
    /// back to back.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        action: F,
    ) -> Result<TaskHandle, SchedulerError>
    where
        F: FnMut() + Send + 'static,
    {
        self.submit(initial_delay, Some(period.max(Duration::from_millis(1))), Box::new(action))
    }

    /// Runs `action` once, after `delay`.
    pub fn schedule_once<F>(&self, delay: Duration, action: F) -> Result<TaskHandle, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut action = Some(action);
        self.submit(
            delay,
            None,
            Box::new(move || {
                if let Some(action) = action.take() {
                    action();
                }
            }),
        )
    }

    fn submit(
        &self,
        delay: Duration,
        period: Option<Duration>,
        action: Action,
    ) -> Result<TaskHandle, SchedulerError> {
        let worker = self.worker.get_or_try_init(|| self.spawn())?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = Task { id, next_run: Instant::now() + delay, period, action };
        worker.commands.send(Command::Schedule(task)).map_err(|_| SchedulerError::Shutdown)?;

        Ok(TaskHandle { id, commands: worker.commands.clone() })
    }

    /// Stops the worker thread and waits for it to exit.
    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.get() {
            let _ = worker.commands.send(Command::Shutdown);
            if let Some(handle) = worker.handle.lock().take() {
                let _ = handle.join();
            }
        }
    }

    fn spawn(&self) -> Result<Worker, SchedulerError> {
        let (commands, receiver) = unbounded();
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || run(receiver))
            .map_err(SchedulerError::Spawn)?;
        Ok(Worker { commands, handle: Mutex::new(Some(handle)) })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get() {
            let _ = worker.commands.send(Command::Shutdown);
        }
    }
}

/// Handle to a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Clone)]
pub struct TaskHandle {
    id: u64,
    commands: Sender<Command>,
}

impl TaskHandle {
    /// Cancels the task. Does nothing if it was already cancelled or the scheduler is gone.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel(self.id));
    }
}

fn run(commands: Receiver<Command>) {
    debug!("scheduler worker started");
    let mut tasks: Vec<Task> = Vec::new();

    loop {
        let command = match tasks.iter().map(|t| t.next_run).min() {
            Some(next_run) => {
                commands.recv_timeout(next_run.saturating_duration_since(Instant::now()))
            }
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(Command::Schedule(task)) => tasks.push(task),
            Ok(Command::Cancel(id)) => tasks.retain(|t| t.id != id),
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        tasks.retain_mut(|task| {
            if task.next_run > now {
                return true;
            }
            if catch_unwind(AssertUnwindSafe(&mut task.action)).is_err() {
                error!(task = task.id, "scheduled task panicked");
            }
            match task.period {
                Some(period) => {
                    while task.next_run <= now {
                        task.next_run += period;
                    }
                    true
                }
                None => false,
            }
        });
    }

    debug!(remaining = tasks.len(), "scheduler worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_thread_is_started_lazily() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.is_started());

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scheduler
            .schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(5), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(scheduler.is_started());
        assert!(wait_for(|| runs.load(Ordering::SeqCst) >= 3));
        scheduler.shutdown();
    }

    #[test]
    fn test_cancel() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = scheduler
            .schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(5), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(wait_for(|| runs.load(Ordering::SeqCst) >= 1));

        handle.cancel();
        handle.cancel();
        // Let the cancellation reach the worker, then make sure nothing runs anymore.
        thread::sleep(Duration::from_millis(50));
        let after_cancel = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
        scheduler.shutdown();
    }

    #[test]
    fn test_panicking_task_does_not_stop_others() {
        let scheduler = Scheduler::new();
        scheduler
            .schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(5), || {
                panic!("housekeeping failed")
            })
            .unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scheduler
            .schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(5), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(wait_for(|| runs.load(Ordering::SeqCst) >= 3));
        scheduler.shutdown();
    }

    #[test]
    fn test_schedule_once_runs_a_single_time() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scheduler
            .schedule_once(Duration::from_millis(5), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(wait_for(|| runs.load(Ordering::SeqCst) == 1));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        scheduler.shutdown();
    }

    #[test]
    fn test_cancelled_one_shot_never_runs() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = scheduler
            .schedule_once(Duration::from_millis(100), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        handle.cancel();

        thread::sleep(Duration::from_millis(200));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        scheduler.shutdown();
    }

    #[test]
    fn test_schedule_after_shutdown_fails() {
        let scheduler = Scheduler::new();
        let minute = Duration::from_secs(60);
        scheduler.schedule_at_fixed_rate(minute, minute, || {}).unwrap();
        scheduler.shutdown();
        assert!(matches!(
            scheduler.schedule_at_fixed_rate(Duration::ZERO, Duration::from_secs(1), || {}),
            Err(SchedulerError::Shutdown)
        ));
    }
}
