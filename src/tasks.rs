//! Bounded worker pool backing `parallel` blocks, plus the thread spawner
//! used by `schedule` timers.
//!
//! Workers pull jobs from a single mpsc queue shared behind a mutex and
//! report each job's outcome on a dedicated channel, so the submitter can
//! join the task later and observe the first error.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::diagnostics::{Diagnostic, DiagnosticKind, LantanaError};

type JobFn = Box<dyn FnOnce() -> Result<(), LantanaError> + Send>;

enum WorkerMessage {
    Job(Job),
    Shutdown,
}

struct Job {
    work: JobFn,
    outcome: Sender<Result<(), LantanaError>>,
}

/// Handle to one submitted parallel task. Joining blocks until the task
/// has run; there is no timeout, so a hung task blocks the join
/// indefinitely.
pub struct TaskHandle {
    outcome: Receiver<Result<(), LantanaError>>,
}

impl TaskHandle {
    pub fn join(self) -> Result<(), LantanaError> {
        self.outcome.recv().unwrap_or_else(|_| {
            Err(LantanaError::from(Diagnostic::new(
                DiagnosticKind::UndefinedReference,
                "parallel task terminated without reporting a result",
            )))
        })
    }
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    sender: Sender<WorkerMessage>,
    workers: Vec<JoinHandle<()>>,
    worker_count: usize,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::with_workers(num_cpus::get())
    }

    pub fn with_workers(count: usize) -> Self {
        let count = count.max(1);
        let (sender, receiver) = mpsc::channel::<WorkerMessage>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("lantana-worker-{id}"))
                .spawn(move || worker_loop(receiver))
                .expect("failed to spawn pool worker");
            workers.push(handle);
        }

        Self {
            sender,
            workers,
            worker_count: count,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Submit a task and return its handle immediately; the caller decides
    /// when (and whether) to join.
    pub fn submit<F>(&self, work: F) -> TaskHandle
    where
        F: FnOnce() -> Result<(), LantanaError> + Send + 'static,
    {
        let (outcome_tx, outcome_rx) = mpsc::channel();
        let job = Job {
            work: Box::new(work),
            outcome: outcome_tx,
        };
        // A send error means every worker is gone; the handle then reports
        // the abandoned-task diagnostic on join.
        let _ = self.sender.send(WorkerMessage::Job(job));
        TaskHandle {
            outcome: outcome_rx,
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Shutdown messages queue behind outstanding jobs, so workers
        // finish what was already submitted.
        for _ in 0..self.worker_count {
            let _ = self.sender.send(WorkerMessage::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .finish()
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<WorkerMessage>>>) {
    loop {
        let message = {
            let lock = receiver.lock().expect("worker receiver lock poisoned");
            lock.recv()
        };
        match message {
            Ok(WorkerMessage::Job(job)) => {
                let result = (job.work)();
                let _ = job.outcome.send(result);
            }
            Ok(WorkerMessage::Shutdown) | Err(_) => break,
        }
    }
}

/// Spawn a named background thread for a scheduled task. The thread runs
/// detached for the process lifetime or until its cooperative stop flag is
/// observed; callers keep the handle only for bookkeeping.
pub fn spawn_timer<F>(name: String, work: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(work)
        .expect("failed to spawn timer thread")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn pool_runs_submitted_tasks() {
        let pool = WorkerPool::with_workers(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<TaskHandle> = (0..5)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("task should succeed");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn pool_surfaces_task_errors_on_join() {
        let pool = WorkerPool::with_workers(1);
        let handle = pool.submit(|| {
            Err(LantanaError::from(Diagnostic::new(
                DiagnosticKind::DivisionByZero,
                "division by zero",
            )))
        });
        let err = handle.join().expect_err("task error should surface");
        assert!(format!("{err}").contains("division by zero"));
    }

    #[test]
    fn pool_clamps_worker_count_to_one() {
        let pool = WorkerPool::with_workers(0);
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn slow_tasks_complete_before_drop_finishes() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::with_workers(2);
            for _ in 0..4 {
                let counter = Arc::clone(&counter);
                // Handles dropped without joining; drop order still lets
                // the queued jobs finish before workers shut down.
                let _ = pool.submit(move || {
                    thread::sleep(Duration::from_millis(10));
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
