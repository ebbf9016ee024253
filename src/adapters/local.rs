use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use crate::core::drives::{DriveError, DriveFs, is_drive_letter, resolve_drive_path};

/// Drives as seen by the host operating system.
pub struct LocalFs {
    mount_roots: Vec<PathBuf>,
    drive_letters: bool,
}

impl LocalFs {
    pub fn new(mount_roots: Vec<PathBuf>) -> Self {
        Self {
            mount_roots,
            drive_letters: cfg!(windows),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_mount_roots())
    }

    fn is_letter(&self, drive: &str) -> bool {
        self.drive_letters && is_drive_letter(drive)
    }
}

impl DriveFs for LocalFs {
    fn drive_exists(&self, drive: &str) -> bool {
        let path = self.drive_path(drive);
        if !path.is_dir() {
            return false;
        }
        // Mount directories outlive the drive, both automounter labels and fixed paths
        self.is_letter(drive) || is_mount_point(&path)
    }

    fn drive_path(&self, drive: &str) -> PathBuf {
        resolve_drive_path(drive, self.drive_letters, &self.mount_roots)
    }

    fn unmount(&self, drive: &str) -> Result<(), DriveError> {
        let path = self.drive_path(drive);
        if !path.exists() {
            return Err(DriveError::NotAttached(drive.to_string()));
        }

        info!(drive = %drive, path = %path.display(), "Unmounting drive");
        unmount_path(&path).map_err(|reason| DriveError::Unmount {
            drive: drive.to_string(),
            reason,
        })
    }
}

fn default_mount_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if cfg!(target_os = "macos") {
        roots.push(PathBuf::from("/Volumes"));
        return roots;
    }

    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .ok()
        .filter(|u| !u.is_empty());

    if let Some(user) = user {
        roots.push(PathBuf::from("/media").join(&user));
        roots.push(PathBuf::from("/run/media").join(&user));
    }
    roots.push(PathBuf::from("/media"));
    roots.push(PathBuf::from("/mnt"));
    roots
}

#[cfg(unix)]
fn is_mount_point(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Some(parent) = path.parent() else {
        return true;
    };
    match (std::fs::metadata(path), std::fs::metadata(parent)) {
        (Ok(own), Ok(up)) => own.dev() != up.dev() || own.ino() == up.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_mount_point(_path: &Path) -> bool {
    true
}

#[cfg(target_os = "linux")]
fn unmount_path(path: &Path) -> Result<(), String> {
    use nix::errno::Errno;

    nix::unistd::sync();

    match nix::mount::umount(path) {
        Ok(()) => Ok(()),
        Err(Errno::EPERM) => {
            // Not root: let the user-level tools handle desktop mounts
            tracing::debug!(path = %path.display(), "umount(2) not permitted, trying system tools");
            run_tool("umount", &[path.as_os_str()])
                .or_else(|e| {
                    tracing::debug!(error = %e, "umount failed, trying gio");
                    run_tool("gio", &[OsStr::new("mount"), OsStr::new("-u"), path.as_os_str()])
                })
        }
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(target_os = "macos")]
fn unmount_path(path: &Path) -> Result<(), String> {
    run_tool("diskutil", &[OsStr::new("unmount"), path.as_os_str()])
}

#[cfg(windows)]
fn unmount_path(path: &Path) -> Result<(), String> {
    let root = path.to_string_lossy();
    let volume = root.trim_end_matches(['/', '\\']);
    run_tool("mountvol", &[OsStr::new(volume), OsStr::new("/P")])
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn unmount_path(path: &Path) -> Result<(), String> {
    run_tool("umount", &[path.as_os_str()])
}

fn run_tool(program: &str, args: &[&OsStr]) -> Result<(), String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| format!("failed to run {}: {}", program, e))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}
