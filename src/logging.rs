//! Logging and tracing initialization.
//!
//! Console output is either human readable or JSON. On top of that the
//! daemon writes a size-rotated log file and keeps a short in-memory
//! activity feed that the CLI can show as status messages.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::APP_NAME;

/// Rotate the log file once it reaches this size.
pub const LOG_FILE_MAX_BYTES: u64 = 1024 * 1024;

/// Number of rotated files kept next to the live one.
pub const LOG_FILE_BACKUPS: usize = 2;

const ACTIVITY_CAPACITY: usize = 200;

/// Configuration for the logging system.
#[derive(Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
    /// Directory for the rotating log file. No file logging when unset.
    pub log_dir: Option<PathBuf>,
    /// Feed for recent status messages.
    pub activity: Option<ActivityLog>,
}

/// Initialize the tracing subscriber with the given configuration.
///
/// The log level can be overridden at runtime via the `RUST_LOG` environment variable.
pub fn init(config: LogConfig) {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{}={}", APP_NAME, default_level.as_str().to_lowercase()))
    });

    let activity_layer = config.activity.map(ActivityLayer::new);

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .with(file_layer(config.log_dir.as_deref()))
            .with(activity_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(file_layer(config.log_dir.as_deref()))
            .with(activity_layer)
            .init();
    }
}

/// Plain-text layer writing to the rotating log file in `dir`.
///
/// A file that cannot be opened is reported on stderr and skipped.
fn file_layer<S>(dir: Option<&Path>) -> Option<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let dir = dir?;
    let path = dir.join(format!("{APP_NAME}.log"));

    match RotatingFile::open(path, LOG_FILE_MAX_BYTES, LOG_FILE_BACKUPS) {
        Ok(file) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file)),
        ),
        Err(e) => {
            eprintln!("Failed to open log file in {}: {}", dir.display(), e);
            None
        }
    }
}

/// Append-only log file that rotates by size.
///
/// When a write would grow the file past `max_bytes`, `app.log` becomes
/// `app.log.1`, `app.log.1` becomes `app.log.2` and so on up to `backups`.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            path,
            max_bytes,
            backups,
            file,
            written,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.backups == 0 {
            self.file = File::create(&self.path)?;
        } else {
            for n in (1..self.backups).rev() {
                let from = numbered(&self.path, n);
                if from.exists() {
                    fs::rename(&from, numbered(&self.path, n + 1))?;
                }
            }
            fs::rename(&self.path, numbered(&self.path, 1))?;
            self.file = open_append(&self.path)?;
        }

        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn numbered(path: &Path, n: usize) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    path.with_file_name(name)
}

/// One status message captured from the log stream.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Local>,
    pub level: String,
    pub message: String,
}

/// Bounded, shared buffer of recent INFO and above messages from this crate.
#[derive(Clone)]
pub struct ActivityLog {
    entries: Arc<Mutex<VecDeque<ActivityEntry>>>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(ACTIVITY_CAPACITY)
    }
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, entry: ActivityEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.iter().rev().take(limit).cloned().collect()
    }
}

/// Tracing layer that copies user-facing events into an [`ActivityLog`].
pub struct ActivityLayer {
    log: ActivityLog,
}

impl ActivityLayer {
    pub fn new(log: ActivityLog) -> Self {
        Self { log }
    }
}

impl<S: Subscriber> Layer<S> for ActivityLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::INFO || !meta.target().starts_with(APP_NAME) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.log.push(ActivityEntry {
            timestamp: Local::now(),
            level: meta.level().to_string(),
            message: visitor.finish(),
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// A rate limiter for throttling log messages.
///
/// Useful for progress updates that would otherwise spam the logs.
pub struct LogThrottle {
    interval_ms: u64,
    /// Stores the last log time in ms, or u64::MAX to indicate "never logged"
    last_log_ms: AtomicU64,
    start: Instant,
}

/// Sentinel value indicating the throttle has never logged
const NEVER_LOGGED: u64 = u64::MAX;

impl LogThrottle {
    pub fn new(interval: std::time::Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_log_ms: AtomicU64::new(NEVER_LOGGED),
            start: Instant::now(),
        }
    }

    /// Returns true if enough time has passed since the last log.
    pub fn should_log(&self) -> bool {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);

        let should = last == NEVER_LOGGED || now_ms.saturating_sub(last) >= self.interval_ms;

        if should {
            // Losing the race means another thread just logged
            self.last_log_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn throttle_allows_first_log() {
        let throttle = LogThrottle::new(Duration::from_secs(1));
        assert!(throttle.should_log());
    }

    #[test]
    fn throttle_blocks_immediate_second_log() {
        let throttle = LogThrottle::new(Duration::from_secs(1));
        assert!(throttle.should_log());
        assert!(!throttle.should_log());
    }

    #[test]
    fn rotating_file_keeps_bounded_backups() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("app.log");
        let mut file = RotatingFile::open(&path, 10, 2).unwrap();

        for line in ["aaaaaaaa\n", "bbbbbbbb\n", "cccccccc\n", "dddddddd\n"] {
            file.write_all(line.as_bytes()).unwrap();
        }
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "dddddddd\n");
        assert_eq!(fs::read_to_string(numbered(&path, 1)).unwrap(), "cccccccc\n");
        assert_eq!(fs::read_to_string(numbered(&path, 2)).unwrap(), "bbbbbbbb\n");
        assert!(!numbered(&path, 3).exists());
    }

    #[test]
    fn rotating_file_appends_to_existing() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("app.log");
        fs::write(&path, "old\n").unwrap();

        let mut file = RotatingFile::open(&path, 1024, 1).unwrap();
        file.write_all(b"new\n").unwrap();
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }

    #[test]
    fn activity_log_drops_oldest() {
        let log = ActivityLog::new(2);
        for message in ["one", "two", "three"] {
            log.push(ActivityEntry {
                timestamp: Local::now(),
                level: "INFO".to_string(),
                message: message.to_string(),
            });
        }

        let recent: Vec<_> = log.recent(10).into_iter().map(|e| e.message).collect();
        assert_eq!(recent, vec!["three", "two"]);
    }

    #[test]
    fn activity_layer_captures_crate_events() {
        let log = ActivityLog::new(10);
        let subscriber = tracing_subscriber::registry().with(ActivityLayer::new(log.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "dvrmanager::core", files = 3, "Export complete");
            tracing::debug!(target: "dvrmanager::core", "too chatty");
            tracing::info!(target: "other_crate", "not ours");
        });

        let recent = log.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "Export complete files=3");
        assert_eq!(recent[0].level, "INFO");
    }
}
