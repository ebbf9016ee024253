//! Dispatching export jobs onto the blocking worker pool.

use chrono::Local;
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use super::export::{ExportOptions, plan_export, run_export};
use super::models::ExportStatus;
use crate::context::AppContext;
use crate::settings::ExportItem;

/// Start an export for `rule` and return its job id.
///
/// The job runs in the background; its progress shows up in
/// `ctx.progress`. Jobs are independent of each other.
pub fn spawn_export(ctx: &AppContext, rule: ExportItem) -> String {
    let job_id = Uuid::now_v7().to_string();
    let span = info_span!("export_job", job_id = %job_id, drive = %rule.drive_name);

    info!(job_id = %job_id, drive = %rule.drive_name, "Export job queued");
    ctx.jobs
        .spawn(run_job(ctx.clone(), job_id.clone(), rule).instrument(span));

    job_id
}

async fn run_job(ctx: AppContext, job_id: String, rule: ExportItem) {
    ctx.progress.start(&job_id, &rule.drive_name).await;

    let fs = ctx.fs.clone();
    let target_dir = ctx.settings.target_directory();
    let options = ExportOptions::for_rule(&rule, &ctx.config);
    let date = Local::now().date_naive();
    let (tx, mut rx) = mpsc::channel(64);

    let span = tracing::Span::current();
    let worker = tokio::task::spawn_blocking(move || {
        let _guard = span.enter();
        let plan = plan_export(fs.as_ref(), &rule, &target_dir, date)?;
        Ok::<_, anyhow::Error>(run_export(fs.as_ref(), &plan, &options, |status| {
            let _ = tx.blocking_send(status);
        }))
    });

    while let Some(status) = rx.recv().await {
        ctx.progress.update(&job_id, status).await;
    }

    let final_status = match worker.await {
        Ok(Ok(report)) => ExportStatus::Finished(report),
        Ok(Err(e)) => {
            error!(error = %e, "Export could not start");
            ExportStatus::Failed(e.to_string())
        }
        Err(e) => {
            error!(error = %e, "Export worker crashed");
            ExportStatus::Failed(format!("export worker crashed: {e}"))
        }
    };

    ctx.progress.finish(&job_id, final_status).await;
}
