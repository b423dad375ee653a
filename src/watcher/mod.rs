//! Filesystem monitoring with restart-safe registration.
//!
//! # Architecture
//!
//! ```text
//! WatchRegistry ── MonitorStore (descriptors survive restarts)
//!   │
//!   ├─ CallbackResolver (qualified name -> live callback)
//!   │
//!   └─ Watch (path, callback)
//!        - notify::RecommendedWatcher
//!        - delivery thread: translate -> FsCallback
//! ```
//!
//! At most one watch exists per `(path, callback)` pair. Registering an
//! existing pair returns it, upgrading to recursive observation when asked.

mod callback;
mod error;
mod event;
mod registry;
mod watch;

pub use callback::{CallbackRef, CallbackResolver, FsCallback, NamedCallback, validate_identifier};
pub use error::{CallbackResolutionError, RegistryError, WatchError};
pub use event::{EventTranslator, FsEvent, translate};
pub use registry::WatchRegistry;
pub use watch::Watch;
