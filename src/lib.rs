#[macro_use]
pub mod logging;

pub mod app;
pub mod cli;
pub mod config;
pub mod events;
pub mod handlers;
pub mod storage;
pub mod tasks;
pub mod watcher;

pub use app::{AppContext, AppError};
pub use config::Settings;
pub use events::{Lifecycle, PermissionEvent, UserEvent};
pub use handlers::{Handler, HandlerFactory, Permission};
pub use storage::{JsonFileStore, MemoryStore, MonitorStore, WatchDescriptor};
pub use tasks::{Chain, RetryPolicy, TaskPool};
pub use watcher::{CallbackRef, CallbackResolver, WatchRegistry};
