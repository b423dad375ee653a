//! Fan-out of user and permission events to the active handlers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::handlers::{Handler, HandlerError, HandlerFactory, Permission};

/// Whether something appeared or went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Created,
    Deleted,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Created => f.write_str("created"),
            Lifecycle::Deleted => f.write_str("deleted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    pub event: Lifecycle,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEvent {
    pub event: Lifecycle,
    pub permission: Permission,
}

/// Handlers that failed while the others went on.
#[derive(Error, Debug)]
pub struct DispatchError {
    pub failures: Vec<(String, HandlerError)>,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} handler(s) failed", self.failures.len())?;
        for (name, error) in &self.failures {
            write!(f, "; {name}: {error}")?;
        }
        Ok(())
    }
}

/// Hand a user event to every active handler, in priority order.
///
/// Returns how many handlers were called.
pub fn dispatch_user(factory: &HandlerFactory, event: &UserEvent) -> Result<usize, DispatchError> {
    crate::log_event!("events", "user", "{} {}", event.user_name, event.event);
    dispatch(factory, |handler| match event.event {
        Lifecycle::Created => handler.user_created(&event.user_name),
        Lifecycle::Deleted => handler.user_deleted(&event.user_name),
    })
}

/// Hand a permission event to every active handler, in priority order.
pub fn dispatch_permission(
    factory: &HandlerFactory,
    event: &PermissionEvent,
) -> Result<usize, DispatchError> {
    crate::log_event!("events", "permission", "{} {}", event.permission, event.event);
    dispatch(factory, |handler| match event.event {
        Lifecycle::Created => handler.permission_created(&event.permission),
        Lifecycle::Deleted => handler.permission_deleted(&event.permission),
    })
}

fn dispatch<F>(factory: &HandlerFactory, mut call: F) -> Result<usize, DispatchError>
where
    F: FnMut(&dyn Handler) -> Result<(), HandlerError>,
{
    let handlers = factory.get_active_handlers();
    let mut failures = Vec::new();

    for handler in &handlers {
        if let Err(e) = call(handler.as_ref()) {
            tracing::error!("[events] handler {} failed: {e}", handler.name());
            failures.push((handler.name().to_string(), e));
        }
    }

    if failures.is_empty() {
        Ok(handlers.len())
    } else {
        Err(DispatchError { failures })
    }
}
