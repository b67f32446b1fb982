//! Uninstall-app command
use anyhow::{Context, Result};

use crate::session::{Session, SessionOptions};
use crate::ui;

/// Remove the app from the device after confirming.
pub async fn uninstall_app(opts: &SessionOptions) -> Result<()> {
    let session = Session::open(opts).await?;
    let ctx = &session.ctx;
    let app_id = session.app_id();

    if ctx.app.read().await.is_none() {
        ui::warn(&format!("{app_id} is not installed"));
        return Ok(());
    }
    if !ctx.prompter.confirm_uninstall_app(app_id).await {
        println!("  Cancelled.");
        return Ok(());
    }

    let guard = ctx.lock.try_start(true)?;
    ctx.uninstall_app(&guard)
        .await
        .with_context(|| format!("Failed to uninstall {app_id}"))?;
    drop(guard);

    ui::success(&format!("Uninstalled {app_id}"));
    Ok(())
}
