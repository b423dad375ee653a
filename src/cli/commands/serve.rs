//! The long-running sync service.

use crate::app::{AppContext, AppError};

/// Start the context and serve until Ctrl-C.
///
/// A handler that fails to resync is logged; the service still starts.
pub async fn run(ctx: &AppContext) -> Result<(), AppError> {
    match ctx.start() {
        Ok(()) => {}
        Err(e @ AppError::Resync { .. }) => tracing::warn!("[serve] {e}"),
        Err(e) => return Err(e),
    }

    crate::log_event!(
        "serve",
        "running",
        "reconcile every {}s",
        ctx.settings.monitoring.reconcile_interval().as_secs()
    );
    ctx.serve().await?;
    ctx.pool.idle().await;
    Ok(())
}
