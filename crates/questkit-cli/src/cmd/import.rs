//! Import command
use std::path::PathBuf;

use anyhow::{Result, bail};

use questkit_core::import::EnqueueOutcome;

use crate::session::{Session, SessionOptions};
use crate::ui;

pub async fn import(
    opts: &SessionOptions,
    paths: Vec<PathBuf>,
    destination: Option<String>,
) -> Result<()> {
    let session = Session::open(opts).await?;
    let queue = session.import_queue();

    let summary = match queue.enqueue(paths, destination).await? {
        EnqueueOutcome::Completed(summary) => summary,
        // Single caller; nothing else can be draining.
        EnqueueOutcome::Merged => return Ok(()),
    };

    println!();
    for path in &summary.imported {
        ui::success(&format!("Imported {}", path.display()));
    }
    for path in &summary.skipped {
        ui::warn(&format!("Skipped {}", path.display()));
    }
    for (path, e) in &summary.failures {
        ui::failure(&format!("{}: {e}", path.display()));
    }
    println!();

    if !summary.failures.is_empty() {
        bail!(
            "{} of {} files failed to import ({} unexpected)",
            summary.failures.len(),
            summary.processed,
            summary.unexpected_failures()
        );
    }
    Ok(())
}
