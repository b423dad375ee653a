//! Read-only views of handlers and persisted watches.

use crate::app::{AppContext, AppError};

/// Print active handlers in dispatch order, then configured ones that
/// yield no handler.
pub fn handlers(ctx: &AppContext) {
    let active = ctx.factory.get_active_handlers();
    if active.is_empty() {
        println!("No active handlers");
    } else {
        println!("Active handlers (dispatch order):");
        for handler in &active {
            println!("  {:>20}  {}", handler.priority(), handler.name());
        }
    }

    let idle: Vec<String> = ctx
        .factory
        .configs()
        .iter()
        .filter(|(name, _)| !active.iter().any(|h| h.name() == name.as_str()))
        .map(|(name, config)| {
            let reason = if !ctx.factory.is_recognized(name) {
                "unrecognized"
            } else if !config.active {
                "inactive"
            } else {
                "failed to start"
            };
            format!("  {name} ({reason})")
        })
        .collect();

    if !idle.is_empty() {
        println!("Not dispatched:");
        for line in idle {
            println!("{line}");
        }
    }
}

/// Print every persisted watch descriptor.
pub fn monitors(ctx: &AppContext) -> Result<(), AppError> {
    let descriptors = ctx.store.list_monitors()?;
    if descriptors.is_empty() {
        println!("No persisted watches");
        return Ok(());
    }

    for descriptor in descriptors {
        let mode = if descriptor.recursive {
            "recursive"
        } else {
            "flat"
        };
        let state = if descriptor.path.exists() {
            ""
        } else {
            " [missing]"
        };
        println!(
            "{} ({mode}) -> {}{state}",
            descriptor.path.display(),
            descriptor.callback
        );
    }
    Ok(())
}
