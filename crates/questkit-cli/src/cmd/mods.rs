//! Registry commands: list, install, uninstall, remove
use anyhow::{Context, Result};

use crate::session::{Session, SessionOptions};
use crate::ui;

/// List every known mod, libraries last.
pub async fn list(opts: &SessionOptions) -> Result<()> {
    let session = Session::open_offline(opts).await?;
    let registry = session.ctx.registry.lock().await;

    if registry.all().is_empty() {
        println!();
        println!("  No mods imported for {}.", session.app_id());
        println!("  Run 'questkit import <file.qmod>' to add one.");
        return Ok(());
    }

    println!();
    ui::print_mod_header();
    for m in registry.mods().chain(registry.libraries()) {
        ui::print_mod_row(m);
    }
    println!();
    Ok(())
}

pub async fn install(opts: &SessionOptions, id: &str) -> Result<()> {
    let session = Session::open(opts).await?;
    let ctx = &session.ctx;
    let _guard = ctx.lock.try_start(false)?;

    let mut registry = ctx.registry.lock().await;
    registry
        .install(id)
        .await
        .with_context(|| format!("Failed to install {id}"))?;
    registry.save().await.context("Failed to save the registry")?;
    ui::success(&format!("Installed {id}"));
    for missing in registry.missing_dependencies(id) {
        ui::warn(&format!("Depends on {missing}, which has not been imported"));
    }
    Ok(())
}

pub async fn uninstall(opts: &SessionOptions, id: &str) -> Result<()> {
    let session = Session::open(opts).await?;
    let ctx = &session.ctx;
    let _guard = ctx.lock.try_start(false)?;

    let mut registry = ctx.registry.lock().await;
    registry
        .uninstall(id)
        .await
        .with_context(|| format!("Failed to uninstall {id}"))?;
    registry.save().await.context("Failed to save the registry")?;
    ui::success(&format!("Uninstalled {id}"));
    Ok(())
}

/// Uninstall if needed, then forget the mod.
pub async fn remove(opts: &SessionOptions, id: &str) -> Result<()> {
    let session = Session::open(opts).await?;
    let ctx = &session.ctx;
    let _guard = ctx.lock.try_start(false)?;

    let mut registry = ctx.registry.lock().await;
    registry
        .uninstall(id)
        .await
        .with_context(|| format!("Failed to uninstall {id}"))?;
    registry.delete_mod(id).await?;
    registry.save().await.context("Failed to save the registry")?;
    ui::success(&format!("Removed {id}"));
    Ok(())
}
