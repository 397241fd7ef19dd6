//! Capture-clocked deferred tasks
//!
//! Tasks are due at a stream frame position rather than a wall-clock
//! instant. The capture writer calls [`TaskScheduler::advance`] after each
//! block; due tasks are handed to a dedicated executor thread so callbacks
//! never run on the writer.

use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Revocable handle to a scheduled task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
    due_frame: u64,
}

impl TaskHandle {
    /// Prevent the task from running. Has no effect once it has started.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Stream frame at which the task becomes due
    pub fn due_frame(&self) -> u64 {
        self.due_frame
    }
}

struct PendingTask {
    handle: TaskHandle,
    task: Task,
}

/// Frame-clocked scheduler with its own executor thread
pub struct TaskScheduler {
    pending: Mutex<Vec<PendingTask>>,
    sender: Option<Sender<PendingTask>>,
    executor: Option<JoinHandle<()>>,
}

impl TaskScheduler {
    /// Create a scheduler and spawn its executor thread
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<PendingTask>();
        let executor = std::thread::Builder::new()
            .name("taptone-tasks".into())
            .spawn(move || Self::executor_loop(receiver));

        let executor = match executor {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn task executor, tasks will run inline");
                None
            }
        };

        Self {
            pending: Mutex::new(Vec::new()),
            sender: Some(sender),
            executor,
        }
    }

    fn executor_loop(receiver: Receiver<PendingTask>) {
        for pending in receiver {
            Self::run(pending);
        }
        tracing::debug!("Task executor exited");
    }

    fn run(pending: PendingTask) {
        if pending.handle.is_cancelled() {
            tracing::trace!(due = pending.handle.due_frame, "task_skipped_cancelled");
            return;
        }
        tracing::trace!(due = pending.handle.due_frame, "task_running");
        (pending.task)();
    }

    /// Queue `task` to run once the stream reaches `due_frame`
    pub fn schedule<F>(&self, due_frame: u64, task: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = TaskHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
            due_frame,
        };
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(PendingTask {
                handle: handle.clone(),
                task: Box::new(task),
            });
        }
        tracing::trace!(due = due_frame, "task_scheduled");
        handle
    }

    /// Dispatch every task due at or before `position`
    ///
    /// Cancelled tasks are dropped here without running.
    pub fn advance(&self, position: u64) {
        let due: Vec<PendingTask> = match self.pending.lock() {
            Ok(mut pending) => {
                pending.retain(|t| !t.handle.is_cancelled());
                if !pending.iter().any(|t| t.handle.due_frame <= position) {
                    return;
                }
                let (due, waiting): (Vec<PendingTask>, Vec<PendingTask>) =
                    std::mem::take(&mut *pending)
                        .into_iter()
                        .partition(|t| t.handle.due_frame <= position);
                *pending = waiting;
                due
            }
            Err(_) => return,
        };

        for task in due {
            match &self.sender {
                Some(sender) if self.executor.is_some() => {
                    if let Err(e) = sender.send(task) {
                        Self::run(e.into_inner());
                    }
                }
                _ => Self::run(task),
            }
        }
    }

    /// Cancel and drop every pending task
    pub fn cancel_all(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            for task in pending.iter() {
                task.handle.cancel();
            }
            let count = pending.len();
            pending.clear();
            if count > 0 {
                tracing::debug!(count, "Cancelled pending tasks");
            }
        }
    }

    /// Number of tasks not yet dispatched
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.cancel_all();
        // Closing the channel ends the executor loop
        self.sender = None;
        if let Some(handle) = self.executor.take() {
            // The last owner may be a task running on the executor itself
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_task_runs_when_due() {
        let scheduler = TaskScheduler::new();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = scheduler.schedule(1000, move || {
            let _ = tx.send(42);
        });
        assert_eq!(handle.due_frame(), 1000);

        scheduler.advance(999);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.advance(1000);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let scheduler = TaskScheduler::new();
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        let handle = scheduler.schedule(10, move || {
            let _ = tx.send(());
        });
        handle.cancel();
        scheduler.advance(100);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_cancel_all() {
        let scheduler = TaskScheduler::new();
        let (tx, rx) = crossbeam_channel::unbounded::<u32>();
        let handles: Vec<TaskHandle> = (0..3)
            .map(|i| {
                let tx = tx.clone();
                scheduler.schedule(10 * i as u64, move || {
                    let _ = tx.send(i);
                })
            })
            .collect();

        scheduler.cancel_all();
        scheduler.advance(1000);
        assert!(handles.iter().all(|h| h.is_cancelled()));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_tasks_run_in_due_order_of_dispatch() {
        let scheduler = TaskScheduler::new();
        let (tx, rx) = crossbeam_channel::unbounded::<u64>();
        for due in [300u64, 100, 200] {
            let tx = tx.clone();
            scheduler.schedule(due, move || {
                let _ = tx.send(due);
            });
        }
        scheduler.advance(150);
        scheduler.advance(250);
        scheduler.advance(350);
        let order: Vec<u64> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(order, vec![100, 200, 300]);
    }
}
