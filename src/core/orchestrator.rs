use anyhow::Result;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::AppContext;
use crate::core::jobs::spawn_export;
use crate::core::monitor::{DriveEvent, DriveMonitor};
use crate::settings::ExportItem;

/// Drives the poll loop: watches configured drives and starts automatic exports.
pub struct Orchestrator {
    ctx: AppContext,
    monitor: Mutex<DriveMonitor>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            monitor: Mutex::new(DriveMonitor::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops [`Orchestrator::start`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Poll until shut down, then wait for running exports to finish.
    pub async fn start(&self) -> Result<()> {
        info!(
            interval_ms = self.ctx.config.poll_interval_ms,
            settings = %self.ctx.settings.path().display(),
            "Drive watcher starting"
        );

        let mut ticker = tokio::time::interval(self.ctx.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        self.ctx.jobs.close();
        if !self.ctx.jobs.is_empty() {
            info!(jobs = self.ctx.jobs.len(), "Waiting for running exports");
        }
        self.ctx.jobs.wait().await;

        info!("Drive watcher stopped");
        Ok(())
    }

    /// Run one poll cycle. Returns the ids of any export jobs started.
    pub async fn poll_once(&self) -> Vec<String> {
        self.ctx.settings.reload_if_changed();
        let rules = self.ctx.settings.snapshot().export_items;

        let mut monitor = self.monitor.lock().await;
        let events = monitor.poll(self.ctx.fs.as_ref(), &rules);
        *self.ctx.drives.write().await = monitor.states();
        drop(monitor);

        events
            .into_iter()
            .flat_map(|event| self.handle_drive_event(event, &rules))
            .collect()
    }

    fn handle_drive_event(&self, event: DriveEvent, rules: &[ExportItem]) -> Vec<String> {
        match event {
            DriveEvent::Attached(name) => {
                info!(drive = %name, "Drive attached");
                let mut started = Vec::new();
                for rule in rules.iter().filter(|r| r.drive_name.trim() == name) {
                    if rule.automatic {
                        started.push(spawn_export(&self.ctx, rule.clone()));
                    } else {
                        debug!(drive = %name, "Rule is manual, not exporting");
                    }
                }
                started
            }
            DriveEvent::Detached(name) => {
                info!(drive = %name, "Drive detached");
                Vec::new()
            }
        }
    }
}
