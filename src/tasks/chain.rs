//! Ordered chains of independently retried steps.
//!
//! Each chain walks a small state machine:
//!
//! ```text
//! Pending -> Running(i, n) -> Running(i + 1, 1) ... -> Succeeded
//!                |    ^
//!                v    |
//!            RetryWait(i, n)
//!                |
//!                v
//!             Aborted (attempt ceiling or backend rejection)
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{RetryPolicy, TaskError};

/// One remote operation inside a chain.
#[async_trait]
pub trait TaskStep: Send + Sync {
    /// Operation name used in logs and outcomes.
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), TaskError>;
}

struct Step {
    task: Arc<dyn TaskStep>,
    policy: RetryPolicy,
}

/// An ordered sequence of steps submitted as a unit.
///
/// Step `i + 1` starts only after step `i` succeeded.
pub struct Chain {
    label: String,
    steps: Vec<Step>,
    best_effort: bool,
}

/// Position of a chain in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainState {
    Pending,
    Running { step: usize, attempt: u32 },
    RetryWait { step: usize, attempt: u32, delay: Duration },
    Succeeded,
    Aborted(ChainOutcome),
}

/// How a chain finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Succeeded {
        steps: usize,
    },
    /// A step kept failing with retryable errors until the attempt ceiling.
    Exhausted {
        step: String,
        attempts: u32,
        error: TaskError,
    },
    /// A step failed with a non-retryable error.
    Rejected {
        step: String,
        error: TaskError,
    },
}

impl ChainOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ChainOutcome::Succeeded { .. })
    }
}

impl Chain {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            best_effort: false,
        }
    }

    /// Append a step retried according to `policy`.
    pub fn then(self, step: impl TaskStep + 'static, policy: RetryPolicy) -> Self {
        self.then_shared(Arc::new(step), policy)
    }

    pub fn then_shared(mut self, step: Arc<dyn TaskStep>, policy: RetryPolicy) -> Self {
        self.steps.push(Step { task: step, policy });
        self
    }

    /// Failures of this chain are expected and only worth a warning.
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.task.name()).collect()
    }

    /// Drive the chain to completion.
    ///
    /// When `permits` is given, each attempt holds one permit while it runs.
    /// Permits are not held during backoff.
    pub async fn run(self, permits: Option<Arc<Semaphore>>) -> ChainOutcome {
        let mut state = ChainState::Pending;
        loop {
            state = match state {
                ChainState::Pending => {
                    if self.steps.is_empty() {
                        ChainState::Succeeded
                    } else {
                        ChainState::Running {
                            step: 0,
                            attempt: 1,
                        }
                    }
                }
                ChainState::Running { step, attempt } => {
                    self.attempt(step, attempt, permits.as_ref()).await
                }
                ChainState::RetryWait {
                    step,
                    attempt,
                    delay,
                } => {
                    tokio::time::sleep(delay).await;
                    ChainState::Running {
                        step,
                        attempt: attempt + 1,
                    }
                }
                ChainState::Succeeded => {
                    return ChainOutcome::Succeeded {
                        steps: self.steps.len(),
                    };
                }
                ChainState::Aborted(outcome) => return outcome,
            };
        }
    }

    async fn attempt(
        &self,
        index: usize,
        attempt: u32,
        permits: Option<&Arc<Semaphore>>,
    ) -> ChainState {
        let step = &self.steps[index];
        let name = step.task.name();

        crate::debug_event!(
            "tasks",
            "running",
            "{} {name} attempt {attempt}/{}",
            self.label,
            step.policy.max_attempts
        );

        let result = {
            let _permit = acquire(permits).await;
            step.task.run().await
        };

        match result {
            Ok(()) if index + 1 == self.steps.len() => ChainState::Succeeded,
            Ok(()) => ChainState::Running {
                step: index + 1,
                attempt: 1,
            },
            Err(error) if !error.is_retryable() => ChainState::Aborted(ChainOutcome::Rejected {
                step: name.to_string(),
                error,
            }),
            Err(error) if attempt >= step.policy.max_attempts => {
                ChainState::Aborted(ChainOutcome::Exhausted {
                    step: name.to_string(),
                    attempts: attempt,
                    error,
                })
            }
            Err(error) => {
                let delay = step.policy.delay_for_attempt(attempt);
                tracing::warn!(
                    "[tasks] {} {name} attempt {attempt} failed: {error}. Retrying in {delay:?}",
                    self.label
                );
                ChainState::RetryWait {
                    step: index,
                    attempt,
                    delay,
                }
            }
        }
    }
}

async fn acquire(permits: Option<&Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    match permits {
        Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
        None => None,
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("label", &self.label)
            .field("steps", &self.step_names())
            .field("best_effort", &self.best_effort)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::BackendError;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `error` for the first `failures` attempts, then succeeds.
    struct Flaky {
        name: &'static str,
        failures: u32,
        error: TaskError,
        calls: Arc<AtomicU32>,
    }

    impl Flaky {
        fn new(name: &'static str, failures: u32, error: TaskError) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            let step = Self {
                name,
                failures,
                error,
                calls: Arc::clone(&calls),
            };
            (step, calls)
        }

        fn ok(name: &'static str) -> (Self, Arc<AtomicU32>) {
            Self::new(name, 0, TaskError::transport(name, "unused"))
        }
    }

    #[async_trait]
    impl TaskStep for Flaky {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) -> Result<(), TaskError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::exponential(8, Duration::from_secs(1), Duration::from_secs(120))
            .with_jitter(false)
    }

    fn missing_siblings() -> TaskError {
        TaskError::precondition("validate_shapefile", "roads.dbf not present")
    }

    #[tokio::test(start_paused = true)]
    async fn test_eighth_attempt_success_proceeds() {
        let (validate, validate_calls) = Flaky::new("validate_shapefile", 7, missing_siblings());
        let (publish, publish_calls) = Flaky::ok("publish_shapefile");

        let outcome = Chain::new("publish roads")
            .then(validate, policy())
            .then(publish, policy())
            .run(None)
            .await;

        assert_eq!(outcome, ChainOutcome::Succeeded { steps: 2 });
        assert_eq!(validate_calls.load(Ordering::SeqCst), 8);
        assert_eq!(publish_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_chain_never_publishes() {
        let (validate, validate_calls) = Flaky::new("validate_shapefile", 8, missing_siblings());
        let (publish, publish_calls) = Flaky::ok("publish_shapefile");

        let outcome = Chain::new("publish roads")
            .then(validate, policy())
            .then(publish, policy())
            .run(None)
            .await;

        assert_eq!(
            outcome,
            ChainOutcome::Exhausted {
                step: "validate_shapefile".to_string(),
                attempts: 8,
                error: missing_siblings(),
            }
        );
        assert_eq!(validate_calls.load(Ordering::SeqCst), 8);
        assert_eq!(publish_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_semantic_error_runs_once() {
        let rejection: TaskError = BackendError::new("create_workspace", "invalid credentials").into();
        let (create, create_calls) = Flaky::new("create_workspace", u32::MAX, rejection.clone());
        let (datastore, datastore_calls) = Flaky::ok("create_datastore");

        let started = tokio::time::Instant::now();
        let outcome = Chain::new("workspace alice")
            .then(create, policy())
            .then(datastore, policy())
            .run(None)
            .await;

        assert_eq!(
            outcome,
            ChainOutcome::Rejected {
                step: "create_workspace".to_string(),
                error: rejection,
            }
        );
        assert_eq!(create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(datastore_calls.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let (step, calls) = Flaky::new(
            "create_workspace",
            3,
            TaskError::transport("create_workspace", "timed out"),
        );

        let started = tokio::time::Instant::now();
        let outcome = Chain::new("workspace alice").then(step, policy()).run(None).await;

        assert!(outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(7_100), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_empty_chain_succeeds() {
        let outcome = Chain::new("nothing").run(None).await;
        assert_eq!(outcome, ChainOutcome::Succeeded { steps: 0 });
    }
}
