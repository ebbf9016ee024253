pub mod drives;
pub mod export;
pub mod jobs;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod progress;

pub use drives::{DriveError, DriveFs};
pub use export::{ExportOptions, ExportPlan, FilePair, plan_export, run_export};
pub use jobs::spawn_export;
pub use models::{ExportReport, ExportStatus, JobRecord};
pub use monitor::{DriveEvent, DriveMonitor, DriveState};
pub use orchestrator::Orchestrator;
pub use progress::ProgressTracker;
