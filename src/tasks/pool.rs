//! Worker pool that runs chains off the calling thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use super::{Chain, ChainOutcome};

/// Runs submitted chains on a tokio runtime.
///
/// Holds a runtime handle so plain threads, such as watch delivery
/// threads, can submit. At most `workers` steps execute at once; chains
/// waiting out a backoff do not count.
#[derive(Clone)]
pub struct TaskPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    workers: usize,
    in_flight: Arc<AtomicUsize>,
    settled: Arc<Notify>,
}

impl TaskPool {
    pub fn new(handle: Handle, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            in_flight: Arc::new(AtomicUsize::new(0)),
            settled: Arc::new(Notify::new()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Chains submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every submitted chain has finished.
    pub async fn idle(&self) {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            settled.await;
        }
    }

    /// Submit a chain and return immediately.
    ///
    /// The outcome is logged by the worker; the handle is only for callers
    /// that want to wait.
    pub fn submit(&self, chain: Chain) -> JoinHandle<ChainOutcome> {
        crate::log_event!(
            "tasks",
            "submitted",
            "{} [{}]",
            chain.label(),
            chain.step_names().join(" -> ")
        );

        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        let settled = Arc::clone(&self.settled);
        in_flight.fetch_add(1, Ordering::SeqCst);

        self.handle.spawn(async move {
            let label = chain.label().to_string();
            let best_effort = chain.is_best_effort();
            let outcome = chain.run(Some(permits)).await;
            report(&label, best_effort, &outcome);
            in_flight.fetch_sub(1, Ordering::SeqCst);
            settled.notify_waiters();
            outcome
        })
    }
}

fn report(label: &str, best_effort: bool, outcome: &ChainOutcome) {
    match outcome {
        ChainOutcome::Succeeded { steps } => {
            crate::log_event!("tasks", "completed", "{label} ({steps} steps)");
        }
        ChainOutcome::Exhausted {
            step,
            attempts,
            error,
        } => {
            let msg = format!("{label} abandoned at {step} after {attempts} attempts: {error}");
            if best_effort {
                tracing::warn!("[tasks] {msg}");
            } else {
                tracing::error!("[tasks] {msg}");
            }
        }
        ChainOutcome::Rejected { step, error } => {
            let msg = format!("{label} aborted at {step}: {error}");
            if best_effort {
                tracing::warn!("[tasks] {msg}");
            } else {
                tracing::error!("[tasks] {msg}");
            }
        }
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("workers", &self.workers)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{RetryPolicy, TaskError, TaskStep};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl TaskStep for Record {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) -> Result<(), TaskError> {
            self.log.lock().push(self.name);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_submit_from_plain_thread() {
        let pool = TaskPool::new(Handle::current(), 2);
        let log = Arc::new(Mutex::new(Vec::new()));

        let chain = Chain::new("ordered")
            .then(
                Record {
                    name: "first",
                    log: Arc::clone(&log),
                },
                RetryPolicy::once(),
            )
            .then(
                Record {
                    name: "second",
                    log: Arc::clone(&log),
                },
                RetryPolicy::once(),
            );

        let submitter = pool.clone();
        let join = std::thread::spawn(move || submitter.submit(chain))
            .join()
            .unwrap();

        let outcome = join.await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(*log.lock(), vec!["first", "second"]);
        assert_eq!(pool.in_flight(), 0);
    }

    struct Sleep(Duration);

    #[async_trait]
    impl TaskStep for Sleep {
        fn name(&self) -> &str {
            "sleep"
        }

        async fn run(&self) -> Result<(), TaskError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_waits_for_every_chain() {
        let pool = TaskPool::new(Handle::current(), 1);
        for secs in [3, 1, 2] {
            drop(pool.submit(
                Chain::new(format!("sleep {secs}"))
                    .then(Sleep(Duration::from_secs(secs)), RetryPolicy::once()),
            ));
        }
        assert_eq!(pool.in_flight(), 3);

        pool.idle().await;
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_worker_floor() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let pool = TaskPool::new(runtime.handle().clone(), 0);
        assert_eq!(pool.workers(), 1);
    }
}
