use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// Pattern used when a rule does not name one: every file on the drive.
pub const MATCH_ALL: &str = "**/*";

static DRIVE_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]):?$").expect("valid drive letter regex"));

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("drive {0} is not attached")]
    NotAttached(String),
    #[error("invalid pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: String },
    #[error("failed to unmount {drive}: {reason}")]
    Unmount { drive: String, reason: String },
}

/// Filesystem operations the watcher needs from the host.
///
/// Implementations are called from both the poll loop and worker threads,
/// so every method is blocking and must be cheap to call repeatedly.
pub trait DriveFs: Send + Sync {
    /// Whether the drive is currently attached.
    fn drive_exists(&self, drive: &str) -> bool;

    /// Root directory of the drive. The path may not exist.
    fn drive_path(&self, drive: &str) -> PathBuf;

    /// Files matching `pattern`, a glob relative to the drive root.
    /// `None` matches every file.
    fn find_matches(&self, drive: &str, pattern: Option<&str>) -> Result<Vec<PathBuf>, DriveError> {
        if !self.drive_exists(drive) {
            return Err(DriveError::NotAttached(drive.to_string()));
        }
        find_files(&self.drive_path(drive), pattern)
    }

    /// Flush and detach the drive.
    /// NOTE: This performs blocking I/O and may shell out to system tools.
    fn unmount(&self, drive: &str) -> Result<(), DriveError>;
}

/// `E` or `E:`.
pub fn is_drive_letter(drive: &str) -> bool {
    DRIVE_LETTER.is_match(drive.trim())
}

/// Resolve a drive identifier to its root directory.
///
/// - `E` or `E:` becomes `E:/` when `drive_letters` is set
/// - an absolute path is used as is
/// - anything else is a volume label, looked up under `mount_roots`;
///   the first root that has it wins, otherwise the first root is assumed
pub fn resolve_drive_path(drive: &str, drive_letters: bool, mount_roots: &[PathBuf]) -> PathBuf {
    let drive = drive.trim();

    if drive_letters {
        if let Some(caps) = DRIVE_LETTER.captures(drive) {
            return PathBuf::from(format!("{}:/", &caps[1]));
        }
    }

    let as_path = Path::new(drive);
    if as_path.is_absolute() {
        return as_path.to_path_buf();
    }

    mount_roots
        .iter()
        .map(|root| root.join(drive))
        .find(|candidate| candidate.is_dir())
        .or_else(|| mount_roots.first().map(|root| root.join(drive)))
        .unwrap_or_else(|| as_path.to_path_buf())
}

/// Glob `pattern` under `root`, returning regular files in sorted order.
///
/// Matching is case-insensitive since camera firmware is inconsistent
/// about extension case. Patterns must stay inside the root.
pub fn find_files(root: &Path, pattern: Option<&str>) -> Result<Vec<PathBuf>, DriveError> {
    let pattern = pattern.map(str::trim).filter(|p| !p.is_empty()).unwrap_or(MATCH_ALL);
    validate_pattern(pattern)?;

    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let full = PathBuf::from(escaped_root).join(pattern);

    let options = glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let entries = glob::glob_with(&full.to_string_lossy(), options).map_err(|e| {
        DriveError::Pattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        }
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) if path.is_file() => Some(path),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %e.path().display(), error = %e.error(), "Skipping unreadable entry");
                None
            }
        })
        .collect();

    files.sort();
    Ok(files)
}

fn validate_pattern(pattern: &str) -> Result<(), DriveError> {
    let invalid = |reason: &str| DriveError::Pattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let path = Path::new(pattern);
    if path.is_absolute() || path.has_root() {
        return Err(invalid("must be relative to the drive root"));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_))) {
        return Err(invalid("must not leave the drive root"));
    }

    glob::Pattern::new(pattern).map_err(|e| invalid(&e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn drive_letters_resolve_to_root() {
        assert_eq!(resolve_drive_path("e", true, &[]), PathBuf::from("e:/"));
        assert_eq!(resolve_drive_path("F:", true, &[]), PathBuf::from("F:/"));
    }

    #[test]
    fn labels_are_not_letters() {
        let roots = vec![PathBuf::from("/media/user")];
        assert_eq!(
            resolve_drive_path("DVR_FLASHDRIVE", true, &roots),
            PathBuf::from("/media/user/DVR_FLASHDRIVE")
        );
        assert_eq!(resolve_drive_path("E", false, &roots), PathBuf::from("/media/user/E"));
    }

    #[test]
    fn label_found_under_later_root() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        fs::create_dir(second.path().join("CAM")).unwrap();

        let roots = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(resolve_drive_path("CAM", false, &roots), second.path().join("CAM"));
    }

    #[cfg(unix)]
    #[test]
    fn absolute_path_is_kept() {
        assert_eq!(
            resolve_drive_path("/mnt/usb", false, &[PathBuf::from("/media")]),
            PathBuf::from("/mnt/usb")
        );
    }

    #[test]
    fn find_files_matches_pattern_case_insensitively() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("DCIM/100")).unwrap();
        fs::write(root.join("DCIM/a.avi"), b"a").unwrap();
        fs::write(root.join("DCIM/B.AVI"), b"b").unwrap();
        fs::write(root.join("DCIM/notes.txt"), b"n").unwrap();
        fs::write(root.join("DCIM/100/c.avi"), b"c").unwrap();

        let files = find_files(root, Some("DCIM/*.avi")).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();

        assert_eq!(names, vec![PathBuf::from("DCIM/B.AVI"), PathBuf::from("DCIM/a.avi")]);
    }

    #[test]
    fn missing_pattern_matches_everything() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("x/y")).unwrap();
        fs::write(root.join("top.bin"), b"1").unwrap();
        fs::write(root.join("x/y/deep.bin"), b"2").unwrap();

        let files = find_files(root, None).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| p.is_file()));
    }

    #[test]
    fn escaping_patterns_rejected() {
        let temp = tempdir().unwrap();
        for pattern in ["../*.avi", "DCIM/../../etc/*"] {
            let err = find_files(temp.path(), Some(pattern)).unwrap_err();
            assert!(matches!(err, DriveError::Pattern { .. }), "{pattern}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn absolute_pattern_rejected() {
        let temp = tempdir().unwrap();
        let err = find_files(temp.path(), Some("/etc/*")).unwrap_err();
        assert!(err.to_string().contains("relative"));
    }

    #[test]
    fn malformed_pattern_rejected() {
        let temp = tempdir().unwrap();
        assert!(find_files(temp.path(), Some("DCIM/[*.avi")).is_err());
    }
}
