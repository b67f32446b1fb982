//! Patch command
use anyhow::Result;

use questkit_core::patching::PipelineState;
use questkit_core::reconcile::Reconciler;

use crate::cmd::core_mods::report_outcome;
use crate::session::{Session, SessionOptions};
use crate::ui;

/// Patch the app, then bring core mods up to date.
pub async fn patch(opts: &SessionOptions) -> Result<()> {
    let session = Session::open(opts).await?;
    let ctx = &session.ctx;

    let pipeline = session.pipeline();
    let mut states = pipeline.subscribe();
    let printer = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            match state {
                PipelineState::Running(stage) => println!("  {stage}..."),
                PipelineState::Failed(stage) => ui::failure(&format!("{stage} failed")),
                PipelineState::Succeeded => ui::success("App patched"),
                PipelineState::NotStarted => {}
            }
        }
    });

    {
        // The device has no usable app between uninstall and install.
        let guard = ctx.lock.try_start(true)?;
        let result = pipeline.run(&guard).await;
        drop(pipeline);
        printer.await.ok();
        result?;
    }

    let guard = ctx.lock.try_start(false)?;
    let outcome = Reconciler::new(ctx).reconcile(&guard).await?;
    report_outcome(&outcome);
    Ok(())
}
