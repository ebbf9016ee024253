//! Persistent user settings: the archive directory and the export rules.
//!
//! Settings live in a flat JSON document. They are loaded once at startup
//! and written back synchronously after every mutation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const DEFAULT_DRIVE_NAME: &str = "DVR_FLASHDRIVE";
const DEFAULT_DRIVE_PATH: &str = "DCIM/*.avi";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no export rule at index {0}")]
    NoSuchRule(usize),
}

/// A rule mapping a removable drive to the files that should be archived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportItem {
    pub drive_name: String,
    #[serde(default)]
    pub drive_path: Option<String>,
    #[serde(default = "default_true")]
    pub delete: bool,
    #[serde(default = "default_true")]
    pub unmount: bool,
    #[serde(default = "default_true")]
    pub automatic: bool,
}

impl ExportItem {
    pub fn create_default() -> Self {
        Self {
            drive_name: DEFAULT_DRIVE_NAME.to_string(),
            drive_path: Some(DEFAULT_DRIVE_PATH.to_string()),
            delete: true,
            unmount: true,
            automatic: true,
        }
    }

    /// The glob pattern for this rule, or `None` when every file should be taken.
    pub fn pattern(&self) -> Option<&str> {
        self.drive_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Partial update for an [`ExportItem`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportItemPatch {
    #[serde(default)]
    pub drive_name: Option<String>,
    #[serde(default)]
    pub drive_path: Option<String>,
    #[serde(default)]
    pub delete: Option<bool>,
    #[serde(default)]
    pub unmount: Option<bool>,
    #[serde(default)]
    pub automatic: Option<bool>,
}

impl ExportItemPatch {
    pub fn is_empty(&self) -> bool {
        self.drive_name.is_none()
            && self.drive_path.is_none()
            && self.delete.is_none()
            && self.unmount.is_none()
            && self.automatic.is_none()
    }

    fn apply(self, item: &mut ExportItem) {
        if let Some(name) = self.drive_name {
            item.drive_name = name;
        }
        if let Some(path) = self.drive_path {
            // An empty string clears the pattern so every file is exported
            item.drive_path = if path.trim().is_empty() {
                None
            } else {
                Some(path)
            };
        }
        if let Some(delete) = self.delete {
            item.delete = delete;
        }
        if let Some(unmount) = self.unmount {
            item.unmount = unmount;
        }
        if let Some(automatic) = self.automatic {
            item.automatic = automatic;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_target_directory")]
    pub target_directory: PathBuf,
    #[serde(default)]
    pub export_items: Vec<ExportItem>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::create_default()
    }
}

impl Settings {
    pub fn create_default() -> Self {
        Self {
            target_directory: default_target_directory(),
            export_items: vec![ExportItem::create_default()],
        }
    }

    /// Load settings from `path`.
    ///
    /// A missing file is replaced by freshly saved defaults. A file that
    /// cannot be read or parsed is moved aside to `<name>.bak` and the
    /// defaults are used in memory only.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "No settings file found, creating defaults");
            let settings = Self::create_default();
            if let Err(e) = settings.save(path) {
                error!(error = %e, "Failed to save default settings");
            }
            return settings;
        }

        match Self::read(path) {
            Ok(settings) => {
                debug!(
                    path = %path.display(),
                    rules = settings.export_items.len(),
                    "Settings loaded"
                );
                settings
            }
            Err(e) => {
                error!(error = %e, "Settings file is unusable, falling back to defaults");
                let backup = backup_path(path);
                match std::fs::rename(path, &backup) {
                    Ok(()) => warn!(backup = %backup.display(), "Moved unusable settings file aside"),
                    Err(e) => warn!(error = %e, "Failed to move unusable settings file aside"),
                }
                Self::create_default()
            }
        }
    }

    /// Read and parse a settings file without any fallback.
    pub fn read(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        std::fs::write(path, content).map_err(write_err)?;

        Ok(())
    }
}

/// Shared, file-backed settings.
///
/// Every mutation goes through here so the file on disk always matches
/// what the daemon is acting on.
#[derive(Clone)]
pub struct SettingsStore {
    path: Arc<PathBuf>,
    inner: Arc<RwLock<StoreState>>,
}

struct StoreState {
    settings: Settings,
    modified: Option<SystemTime>,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = Settings::load(&path);
        let modified = modified_time(&path);

        Self {
            path: Arc::new(path),
            inner: Arc::new(RwLock::new(StoreState { settings, modified })),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        self.read_state().settings.clone()
    }

    pub fn target_directory(&self) -> PathBuf {
        self.read_state().settings.target_directory.clone()
    }

    pub fn rule(&self, index: usize) -> Result<ExportItem, SettingsError> {
        self.read_state()
            .settings
            .export_items
            .get(index)
            .cloned()
            .ok_or(SettingsError::NoSuchRule(index))
    }

    /// Append a default rule and return its index.
    pub fn add_default_rule(&self) -> Result<usize, SettingsError> {
        self.mutate(|settings| {
            settings.export_items.push(ExportItem::create_default());
            Ok(settings.export_items.len() - 1)
        })
    }

    pub fn remove_rule(&self, index: usize) -> Result<ExportItem, SettingsError> {
        self.mutate(|settings| {
            if index >= settings.export_items.len() {
                return Err(SettingsError::NoSuchRule(index));
            }
            Ok(settings.export_items.remove(index))
        })
    }

    pub fn update_rule(
        &self,
        index: usize,
        patch: ExportItemPatch,
    ) -> Result<ExportItem, SettingsError> {
        self.mutate(|settings| {
            let item = settings
                .export_items
                .get_mut(index)
                .ok_or(SettingsError::NoSuchRule(index))?;
            patch.apply(item);
            Ok(item.clone())
        })
    }

    pub fn set_target_directory(&self, dir: impl Into<PathBuf>) -> Result<(), SettingsError> {
        let dir = dir.into();
        self.mutate(|settings| {
            settings.target_directory = dir;
            Ok(())
        })
    }

    /// Re-read the file if something else changed it since we last looked.
    ///
    /// Returns true when new settings were loaded.
    pub fn reload_if_changed(&self) -> bool {
        let mut state = self.write_state();
        self.refresh(&mut state)
    }

    fn refresh(&self, state: &mut StoreState) -> bool {
        let current = modified_time(&self.path);
        if current.is_none() || current == state.modified {
            return false;
        }

        match Settings::read(&self.path) {
            Ok(settings) => {
                state.settings = settings;
                state.modified = current;
                info!(path = %self.path.display(), "Settings reloaded");
                true
            }
            Err(e) => {
                // Keep what we have; the file may be mid-write.
                warn!(error = %e, "Ignoring settings change");
                state.modified = current;
                false
            }
        }
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Settings) -> Result<T, SettingsError>,
    ) -> Result<T, SettingsError> {
        let mut state = self.write_state();
        // Edits saved by another process since our last look must survive this write
        self.refresh(&mut state);

        let mut updated = state.settings.clone();
        let out = f(&mut updated)?;

        updated.save(&self.path)?;
        state.settings = updated;
        state.modified = modified_time(&self.path);

        info!("Settings saved");
        if let Ok(json) = serde_json::to_string(&state.settings) {
            debug!(settings = %json, "Current settings");
        }
        Ok(out)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn default_true() -> bool {
    true
}

/// `$HOME/DVR`, or `./DVR` when no home directory is known.
fn default_target_directory() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("DVR")
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
