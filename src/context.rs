use std::sync::Arc;

use tokio_util::task::TaskTracker;

use crate::config::AppConfig;
use crate::core::{DriveFs, DriveState, ProgressTracker};
use crate::logging::ActivityLog;
use crate::settings::SettingsStore;

/// Everything the daemon, the job runner and the RPC handlers share.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub settings: SettingsStore,
    pub fs: Arc<dyn DriveFs>,
    pub progress: ProgressTracker,
    pub activity: ActivityLog,
    pub drives: Arc<tokio::sync::RwLock<Vec<DriveState>>>,
    pub jobs: TaskTracker,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        settings: SettingsStore,
        fs: Arc<dyn DriveFs>,
        activity: ActivityLog,
    ) -> Self {
        Self {
            config: Arc::new(config),
            settings,
            fs,
            progress: ProgressTracker::new(),
            activity,
            drives: Arc::default(),
            jobs: TaskTracker::new(),
        }
    }
}
