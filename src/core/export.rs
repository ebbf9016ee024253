//! Export job: copy a drive's matching files into the dated archive folder.
//!
//! The job is planned up front into a list of (source, destination) pairs,
//! then copied linearly. A failing file is logged and skipped; a vanished
//! device ends the job early.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use super::drives::{DriveError, DriveFs};
use super::models::{ExportReport, ExportStatus};
use crate::config::AppConfig;
use crate::logging::LogThrottle;
use crate::settings::ExportItem;

/// Buffer size for file I/O operations (128KB)
const BUFFER_SIZE: usize = 128 * 1024;

/// Error messages kept in a report
const MAX_REPORTED_ERRORS: usize = 10;

/// Format of the dated archive folder name.
pub const ARCHIVE_DATE_FORMAT: &str = "%Y-%m-%d";

/// One file to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub drive_name: String,
    pub drive_root: PathBuf,
    pub archive_dir: PathBuf,
    pub pairs: Vec<FilePair>,
}

impl ExportPlan {
    pub fn total_bytes(&self) -> u64 {
        self.pairs.iter().map(|p| p.size).sum()
    }
}

/// What to do around the copy itself.
#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub delete: bool,
    pub unmount: bool,
    pub verify_before_delete: bool,
    pub sync_files: bool,
}

impl ExportOptions {
    pub fn for_rule(rule: &ExportItem, config: &AppConfig) -> Self {
        Self {
            delete: rule.delete,
            unmount: rule.unmount,
            verify_before_delete: config.verify_before_delete,
            sync_files: config.sync_files,
        }
    }
}

/// Archive folder for a given day.
pub fn archive_dir(target_dir: &Path, date: NaiveDate) -> PathBuf {
    target_dir.join(date.format(ARCHIVE_DATE_FORMAT).to_string())
}

/// Work out which files to copy where.
///
/// Each file keeps its path relative to the drive root below
/// `target_dir/<date>`. Names already taken in the archive get a numeric suffix.
pub fn plan_export(
    fs: &dyn DriveFs,
    rule: &ExportItem,
    target_dir: &Path,
    date: NaiveDate,
) -> Result<ExportPlan, DriveError> {
    let drive_name = rule.drive_name.trim().to_string();
    let drive_root = fs.drive_path(&drive_name);
    let archive_dir = archive_dir(target_dir, date);

    let matches = fs.find_matches(&drive_name, rule.pattern())?;

    let mut claimed = HashSet::new();
    let mut pairs = Vec::with_capacity(matches.len());

    for source in matches {
        let relative = match source.strip_prefix(&drive_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => PathBuf::from(source.file_name().unwrap_or_default()),
        };

        let size = match fs::metadata(&source) {
            Ok(m) => m.len(),
            Err(e) => {
                warn!(path = %source.display(), error = %e, "Skipping unreadable file");
                continue;
            }
        };

        let destination = unique_destination(&archive_dir.join(relative), &claimed);
        claimed.insert(destination.clone());
        pairs.push(FilePair {
            source,
            destination,
            size,
        });
    }

    Ok(ExportPlan {
        drive_name,
        drive_root,
        archive_dir,
        pairs,
    })
}

/// `name.ext`, else `name_1.ext`, `name_2.ext`, ... whichever is free.
fn unique_destination(candidate: &Path, claimed: &HashSet<PathBuf>) -> PathBuf {
    let is_free = |p: &Path| !p.exists() && !claimed.contains(p);
    if is_free(candidate) {
        return candidate.to_path_buf();
    }

    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1u32..)
        .map(|n| candidate.with_file_name(format!("{stem}_{n}{ext}")))
        .find(|p| is_free(p))
        .expect("unbounded suffix search always finds a free name")
}

/// Copy everything in `plan`, then delete sources and unmount as requested.
///
/// Blocking; run it on a worker thread. Progress is reported through
/// `on_status` after every file.
pub fn run_export(
    fs: &dyn DriveFs,
    plan: &ExportPlan,
    options: &ExportOptions,
    mut on_status: impl FnMut(ExportStatus),
) -> ExportReport {
    let start_time = Instant::now();
    let total_files = plan.pairs.len();
    let total_bytes = plan.total_bytes();
    let throttle = LogThrottle::new(Duration::from_secs(2));

    let mut report = ExportReport {
        drive_name: plan.drive_name.clone(),
        archive_dir: plan.archive_dir.clone(),
        files_total: total_files,
        ..Default::default()
    };

    info!(
        drive = %plan.drive_name,
        files = total_files,
        total_bytes,
        archive = %plan.archive_dir.display(),
        "Starting export"
    );
    on_status(ExportStatus::Ready);

    let mut archive_ready = true;
    if total_files > 0 {
        if let Err(e) = fs::create_dir_all(&plan.archive_dir) {
            error!(archive = %plan.archive_dir.display(), error = %e, "Failed to create archive folder");
            push_error(&mut report, format!("archive folder: {e}"));
            report.files_failed = total_files;
            archive_ready = false;
        }
    }

    let pairs = if archive_ready { plan.pairs.as_slice() } else { &[] };
    for (index, pair) in pairs.iter().enumerate() {
        let current_file = pair
            .source
            .strip_prefix(&plan.drive_root)
            .unwrap_or(&pair.source)
            .to_string_lossy()
            .into_owned();

        debug!(file = %current_file, size = pair.size, "Copying file");

        match copy_file(&pair.source, &pair.destination, options.sync_files) {
            Ok(copied) => {
                report.files_copied += 1;
                report.bytes_copied += copied.bytes;

                if options.delete {
                    delete_source(pair, &copied, options.verify_before_delete, &mut report);
                }
            }
            Err(e) => {
                // A missing file alone is not proof; the drive itself must be gone
                if e.is_device_removed && !fs.drive_exists(&plan.drive_name) {
                    error!(file = %current_file, error = %e.message, "Device removed during export");
                    report.device_removed = true;
                    report.files_failed += total_files - index;
                    push_error(&mut report, format!("{current_file}: device removed"));
                    break;
                }

                error!(file = %current_file, error = %e.message, "Failed to copy file");
                report.files_failed += 1;
                push_error(&mut report, format!("{current_file}: {}", e.message));
            }
        }

        if throttle.should_log() {
            debug!(
                files_done = index + 1,
                total_files,
                bytes_copied = report.bytes_copied,
                "Export progress"
            );
        }

        on_status(ExportStatus::InProgress {
            total_files,
            files_done: index + 1,
            total_bytes,
            bytes_copied: report.bytes_copied,
            current_file,
            percentage: percentage(report.bytes_copied, total_bytes),
        });
    }

    if options.unmount && archive_ready && !report.device_removed {
        on_status(ExportStatus::Unmounting);
        match fs.unmount(&plan.drive_name) {
            Ok(()) => {
                report.unmounted = true;
                info!(drive = %plan.drive_name, "Drive unmounted");
            }
            Err(e) => {
                warn!(drive = %plan.drive_name, error = %e, "Failed to unmount drive");
                push_error(&mut report, e.to_string());
            }
        }
    }

    report.duration_secs = start_time.elapsed().as_secs();

    info!(
        drive = %plan.drive_name,
        copied = report.files_copied,
        failed = report.files_failed,
        deleted = report.files_deleted,
        bytes = report.bytes_copied,
        duration_secs = report.duration_secs,
        "Export finished"
    );

    report
}

fn delete_source(pair: &FilePair, copied: &CopiedFile, verify: bool, report: &mut ExportReport) {
    if verify {
        match hash_file(&pair.destination) {
            Ok(hash) if hash == copied.hash => {}
            Ok(_) => {
                warn!(file = %pair.source.display(), "Archived copy does not match, keeping source");
                push_error(report, format!("{}: verification mismatch", pair.source.display()));
                return;
            }
            Err(e) => {
                warn!(file = %pair.source.display(), error = %e, "Could not verify archived copy, keeping source");
                push_error(report, format!("{}: verification failed: {e}", pair.source.display()));
                return;
            }
        }
    }

    match fs::remove_file(&pair.source) {
        Ok(()) => report.files_deleted += 1,
        Err(e) => {
            warn!(file = %pair.source.display(), error = %e, "Failed to delete source file");
            push_error(report, format!("{}: delete failed: {e}", pair.source.display()));
        }
    }
}

fn push_error(report: &mut ExportReport, message: String) {
    if report.errors.len() < MAX_REPORTED_ERRORS {
        report.errors.push(message);
    }
}

fn percentage(done: u64, total: u64) -> u8 {
    if total == 0 {
        100
    } else {
        ((done as f64 / total as f64) * 100.0).min(100.0) as u8
    }
}

/// A successfully copied file.
struct CopiedFile {
    bytes: u64,
    hash: blake3::Hash,
}

/// Error information from a file copy operation
struct FileCopyError {
    message: String,
    is_device_removed: bool,
}

impl FileCopyError {
    fn new(context: &str, e: &io::Error) -> Self {
        Self {
            message: format!("{context}: {e}"),
            is_device_removed: is_device_removed_error(e),
        }
    }
}

/// Copy one file, hashing the bytes as they go by.
///
/// Never overwrites: the destination must not exist yet.
fn copy_file(source: &Path, dest: &Path, sync_file: bool) -> Result<CopiedFile, FileCopyError> {
    let source_metadata =
        fs::metadata(source).map_err(|e| FileCopyError::new("Failed to read source metadata", &e))?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| FileCopyError {
            message: format!("Failed to create destination folder: {e}"),
            is_device_removed: false,
        })?;
    }

    let source_file =
        File::open(source).map_err(|e| FileCopyError::new("Failed to open source file", &e))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);

    let dest_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|e| FileCopyError {
            message: format!("Failed to create destination file: {e}"),
            // The destination is local; a failure here says nothing about the drive
            is_device_removed: false,
        })?;

    let copied = stream_into(&mut reader, dest_file, sync_file);
    if copied.is_err() {
        // A half-written file is worse than none
        let _ = fs::remove_file(dest);
        return copied;
    }

    if let Err(e) = preserve_timestamps(&source_metadata, dest) {
        debug!(dest = %dest.display(), error = %e, "Failed to preserve file timestamps");
    }

    copied
}

fn stream_into(
    reader: &mut impl Read,
    dest_file: File,
    sync_file: bool,
) -> Result<CopiedFile, FileCopyError> {
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);

    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| FileCopyError::new("Failed to read from source", &e))?;

        if bytes_read == 0 {
            break;
        }

        writer
            .write_all(&buffer[..bytes_read])
            .map_err(|e| FileCopyError {
                message: format!("Failed to write to destination: {e}"),
                is_device_removed: false,
            })?;
        hasher.update(&buffer[..bytes_read]);
        bytes_written += bytes_read as u64;
    }

    let inner = writer.into_inner().map_err(|e| FileCopyError {
        message: format!("Failed to flush destination file: {}", e.error()),
        is_device_removed: false,
    })?;

    if sync_file {
        inner.sync_all().map_err(|e| FileCopyError {
            message: format!("Failed to sync file: {e}"),
            is_device_removed: false,
        })?;
    }
    drop(inner);

    Ok(CopiedFile {
        bytes: bytes_written,
        hash: hasher.finalize(),
    })
}

fn preserve_timestamps(source_metadata: &fs::Metadata, dest: &Path) -> io::Result<()> {
    let atime = filetime::FileTime::from_last_access_time(source_metadata);
    let mtime = filetime::FileTime::from_last_modification_time(source_metadata);
    filetime::set_file_times(dest, atime, mtime)
}

/// Hash a file using BLAKE3, streaming in chunks to handle large files
fn hash_file(path: &Path) -> io::Result<blake3::Hash> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = blake3::Hasher::new();

    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Check if an I/O error indicates the device has been removed
fn is_device_removed_error(error: &io::Error) -> bool {
    match error.kind() {
        ErrorKind::NotFound => true,
        ErrorKind::PermissionDenied => false,
        ErrorKind::BrokenPipe | ErrorKind::NotConnected => true,
        _ => {
            #[cfg(unix)]
            if let Some(os_error) = error.raw_os_error() {
                return matches!(
                    os_error,
                    libc::EIO | libc::ENODEV | libc::ENXIO
                );
            }
            #[cfg(windows)]
            if let Some(os_error) = error.raw_os_error() {
                // ERROR_NOT_READY, ERROR_DEV_NOT_EXIST
                return matches!(os_error, 21 | 55);
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_device_removed_error_not_found() {
        let error = io::Error::new(ErrorKind::NotFound, "not found");
        assert!(is_device_removed_error(&error));
    }

    #[test]
    fn test_is_device_removed_error_permission_denied() {
        let error = io::Error::new(ErrorKind::PermissionDenied, "permission denied");
        assert!(!is_device_removed_error(&error));
    }

    #[cfg(unix)]
    #[test]
    fn test_is_device_removed_error_eio() {
        let error = io::Error::from_raw_os_error(libc::EIO);
        assert!(is_device_removed_error(&error));
    }

    #[test]
    fn test_copy_file_preserves_content_and_hash() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("source.avi");
        let dest = temp.path().join("out/dest.avi");

        let content = b"test file content for copying";
        fs::write(&source, content).unwrap();

        let copied = copy_file(&source, &dest, true).ok().unwrap();
        assert_eq!(copied.bytes, content.len() as u64);
        assert_eq!(copied.hash, blake3::hash(content));
        assert_eq!(fs::read(&dest).unwrap(), content);
        assert_eq!(
            fs::metadata(&dest).unwrap().modified().unwrap(),
            fs::metadata(&source).unwrap().modified().unwrap()
        );
    }

    #[test]
    fn test_copy_file_refuses_existing_destination() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("a");
        let dest = temp.path().join("b");
        fs::write(&source, b"new").unwrap();
        fs::write(&dest, b"old").unwrap();

        let err = copy_file(&source, &dest, false).err().unwrap();
        assert!(!err.is_device_removed);
        assert_eq!(fs::read(&dest).unwrap(), b"old");
    }

    #[test]
    fn test_unique_destination_suffixes() {
        let temp = tempdir().unwrap();
        let taken = temp.path().join("clip.avi");
        fs::write(&taken, b"x").unwrap();

        let mut claimed = HashSet::new();
        claimed.insert(temp.path().join("clip_1.avi"));

        assert_eq!(
            unique_destination(&taken, &claimed),
            temp.path().join("clip_2.avi")
        );
        assert_eq!(
            unique_destination(&temp.path().join("README"), &claimed),
            temp.path().join("README")
        );
    }

    #[test]
    fn test_archive_dir_is_dated() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            archive_dir(Path::new("/archive"), date),
            PathBuf::from("/archive/2024-03-09")
        );
    }

    #[test]
    fn test_percentage_bounds() {
        assert_eq!(percentage(0, 0), 100);
        assert_eq!(percentage(50, 200), 25);
        assert_eq!(percentage(200, 200), 100);
    }
}
