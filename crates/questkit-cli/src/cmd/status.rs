//! Status command
use anyhow::Result;
use crossterm::style::Stylize;

use crate::session::{Session, SessionOptions};
use crate::ui;

/// Show the target app, whether it is patched, and core mod support.
pub async fn status(opts: &SessionOptions) -> Result<()> {
    let session = Session::open(opts).await?;
    let ctx = &session.ctx;

    ui::section("Status");
    ui::field("App", session.app_id());

    let app = ctx.app.read().await.clone();
    let Some(app) = app else {
        ui::field("Installed", "no".red());
        println!();
        return Ok(());
    };

    ui::field("Version", &app.version);
    ui::field(
        "Modded",
        if app.is_modded { "yes".green() } else { "no".yellow() },
    );
    if app.is_32bit {
        ui::field("Arch", "32-bit only".yellow());
    }
    ui::field("Installer", app.installer.as_deref().unwrap_or("unknown"));

    let core_mods = &ctx.core_mods;
    let support = if core_mods.supports(&app.version) {
        format!("{} required", core_mods.get_required(&app.version).len()).green()
    } else {
        "none published for this version".to_string().yellow()
    };
    ui::field("Core mods", support);
    if let Some(at) = core_mods.refreshed_at() {
        ui::field("Manifest", at.format("%Y-%m-%d %H:%M UTC"));
    }

    let registry = ctx.registry.lock().await;
    let installed = registry.all().iter().filter(|m| m.is_installed()).count();
    ui::field(
        "Mods",
        format!("{} known, {installed} installed", registry.all().len()),
    );
    println!();
    Ok(())
}
