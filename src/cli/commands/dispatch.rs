//! One-shot dispatch of user and permission events.

use crate::app::{AppContext, AppError};
use crate::events::{self, Lifecycle, PermissionEvent, UserEvent};
use crate::handlers::Permission;

/// Dispatch a user event, then wait for the chains it submitted.
pub async fn user(ctx: &AppContext, event: Lifecycle, user_name: String) -> Result<(), AppError> {
    let event = UserEvent { event, user_name };
    let called = events::dispatch_user(&ctx.factory, &event);
    ctx.pool.idle().await;

    println!("{} {}: {} handlers", event.user_name, event.event, called?);
    Ok(())
}

/// Dispatch a permission event, then wait for the chains it submitted.
pub async fn permission(
    ctx: &AppContext,
    event: Lifecycle,
    permission: Permission,
) -> Result<(), AppError> {
    let event = PermissionEvent { event, permission };
    let called = events::dispatch_permission(&ctx.factory, &event);
    ctx.pool.idle().await;

    println!("{} {}: {} handlers", event.permission, event.event, called?);
    Ok(())
}
