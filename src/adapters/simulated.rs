use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::core::drives::{DriveError, DriveFs};

type DriveTable = Arc<Mutex<HashMap<String, PathBuf>>>;

/// Handle for attaching and detaching simulated drives.
#[derive(Clone)]
pub struct Simulator {
    drives: DriveTable,
}

impl Simulator {
    /// Attach a drive backed by an existing directory.
    pub fn attach(&self, name: &str, root: impl Into<PathBuf>) {
        let root = root.into();
        info!(drive = %name, root = %root.display(), "(Simulator) Drive attached");
        lock(&self.drives).insert(name.to_string(), root);
    }

    pub fn detach(&self, name: &str) {
        if lock(&self.drives).remove(name).is_some() {
            info!(drive = %name, "(Simulator) Drive detached");
        }
    }

    pub fn attached(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.drives).keys().cloned().collect();
        names.sort();
        names
    }
}

/// Drive table kept in memory; drives are plain directories.
pub struct SimulatedFs {
    drives: DriveTable,
}

impl SimulatedFs {
    pub fn new() -> (Self, Simulator) {
        let drives: DriveTable = Arc::default();
        (
            Self {
                drives: drives.clone(),
            },
            Simulator { drives },
        )
    }
}

impl DriveFs for SimulatedFs {
    fn drive_exists(&self, drive: &str) -> bool {
        lock(&self.drives)
            .get(drive)
            .is_some_and(|root| root.is_dir())
    }

    fn drive_path(&self, drive: &str) -> PathBuf {
        lock(&self.drives)
            .get(drive)
            .cloned()
            .unwrap_or_else(|| Path::new("/simulated").join(drive))
    }

    fn unmount(&self, drive: &str) -> Result<(), DriveError> {
        match lock(&self.drives).remove(drive) {
            Some(_) => {
                info!(drive = %drive, "(SimulatedFs) Drive unmounted");
                Ok(())
            }
            None => Err(DriveError::NotAttached(drive.to_string())),
        }
    }
}

fn lock(drives: &DriveTable) -> MutexGuard<'_, HashMap<String, PathBuf>> {
    drives.lock().unwrap_or_else(|p| p.into_inner())
}
