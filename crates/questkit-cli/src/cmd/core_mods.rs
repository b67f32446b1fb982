//! Core mods command
use anyhow::{Result, bail};
use crossterm::style::Stylize;

use questkit_core::reconcile::{ReconcileOutcome, Reconciler};
use questkit_schema::ModVersion;

use crate::session::{Session, SessionOptions};
use crate::ui;

/// Show the required core mods, or with `fix`, reconcile the registry against them.
pub async fn core_mods(opts: &SessionOptions, fix: bool) -> Result<()> {
    let session = Session::open(opts).await?;
    let ctx = &session.ctx;

    let Some(version) = ctx.app_version().await else {
        bail!("{} is not installed", session.app_id());
    };

    if fix {
        let guard = ctx.lock.try_start(false)?;
        let outcome = Reconciler::new(ctx).reconcile(&guard).await?;
        report_outcome(&outcome);
        return Ok(());
    }

    if !ctx.core_mods.supports(&version) {
        ui::warn(&format!("No core mods are published for {version}"));
        return Ok(());
    }

    ui::section(&format!("Core mods for {version}"));
    let registry = ctx.registry.lock().await;
    for entry in ctx.core_mods.get_required(&version) {
        let local = registry.get(&entry.id);
        let state = match (local, ModVersion::parse(&entry.version)) {
            (None, _) => "missing".red().to_string(),
            (Some(_), Err(_)) => "unknown version".yellow().to_string(),
            (Some(m), Ok(required)) if m.version() < &required => {
                format!("outdated ({})", m.version()).yellow().to_string()
            }
            (Some(m), Ok(_)) if !m.is_installed() => "disabled".yellow().to_string(),
            (Some(_), Ok(_)) => "ok".green().to_string(),
        };
        println!("  {:<28} {:<12} {state}", entry.id, entry.version);
    }
    println!();
    Ok(())
}

pub(crate) fn report_outcome(outcome: &ReconcileOutcome) {
    match outcome {
        ReconcileOutcome::Compliant => ui::success("Core mods are up to date"),
        ReconcileOutcome::Remediated(report) => {
            for id in &report.installed {
                ui::success(&format!("Installed core mod {id}"));
            }
            for (id, e) in &report.failed {
                ui::failure(&format!("Core mod {id}: {e}"));
            }
        }
        ReconcileOutcome::Declined(missing) => {
            ui::warn(&format!("{} core mods left uninstalled", missing.len()));
        }
        ReconcileOutcome::Unsupported { version, .. } => {
            ui::warn(&format!("No core mods are published for {version}"));
        }
    }
}
