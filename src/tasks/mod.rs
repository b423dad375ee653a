//! Retrying multi-step synchronization.
//!
//! A handler that needs several remote calls per event builds a [`Chain`]
//! of [`TaskStep`]s and submits it to the [`TaskPool`]. Steps run strictly
//! in order; each one is retried on its own according to its
//! [`RetryPolicy`] while its failures are classified as retryable.

mod chain;
mod error;
mod pool;
mod retry;

pub use chain::{Chain, ChainOutcome, ChainState, TaskStep};
pub use error::{BackendError, TaskError};
pub use pool::TaskPool;
pub use retry::RetryPolicy;
