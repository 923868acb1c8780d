//! Process-wide diagnostic logging.
//!
//! # Responsibility
//! - Start the rolling file logger once per process from a [`LoggingConfig`].
//! - Capture panics as sanitized log events.
//!
//! # Invariants
//! - Initialization never panics.
//! - Repeating initialization with an identical config is a no-op; any other
//!   config is rejected once logging is active.
//! - Store events log metadata only (paths, counts, durations), never record
//!   bodies.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "datacontext";
const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static ACTIVE_LOGGER: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    level: &'static str,
    directory: PathBuf,
    _handle: LoggerHandle,
}

/// Logger settings, typically deserialized from the host's config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    #[serde(default = "default_log_level_owned")]
    pub level: String,
    /// Absolute directory receiving `datacontext*.log` files.
    pub directory: PathBuf,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl LoggingConfig {
    /// Config with the build-mode default level.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            level: default_log_level_owned(),
            directory: directory.into(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_files: DEFAULT_MAX_FILES,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_rotation(mut self, max_file_bytes: u64, max_files: usize) -> Self {
        self.max_file_bytes = max_file_bytes;
        self.max_files = max_files;
        self
    }

    /// Checks level, directory and rotation limits.
    pub fn validate(&self) -> Result<(), String> {
        normalize_level(&self.level)?;
        normalize_directory(&self.directory)?;
        if self.max_file_bytes == 0 || self.max_files == 0 {
            return Err("log rotation limits must be positive".to_string());
        }
        Ok(())
    }
}

/// Starts file logging for the process.
///
/// # Errors
/// - Unsupported level, relative or empty directory, zero rotation limits.
/// - The directory cannot be created or the backend fails to start.
/// - Logging is already active with a different level or directory.
pub fn init_logging(config: &LoggingConfig) -> Result<(), String> {
    config.validate()?;
    let level = normalize_level(&config.level)?;
    let directory = normalize_directory(&config.directory)?;

    if let Some(active) = ACTIVE_LOGGER.get() {
        return ensure_same_logger(active, level, &directory);
    }

    let active = ACTIVE_LOGGER.get_or_try_init(|| start_logger(config, level, &directory))?;
    ensure_same_logger(active, level, &directory)
}

/// Active `(level, directory)`, or `None` before [`init_logging`].
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE_LOGGER
        .get()
        .map(|active| (active.level, active.directory.clone()))
}

/// `debug` for debug builds, `info` for release builds.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn default_log_level_owned() -> String {
    default_log_level().to_string()
}

fn default_max_file_bytes() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}

fn default_max_files() -> usize {
    DEFAULT_MAX_FILES
}

fn start_logger(
    config: &LoggingConfig,
    level: &'static str,
    directory: &Path,
) -> Result<ActiveLogger, String> {
    std::fs::create_dir_all(directory).map_err(|err| {
        format!(
            "failed to create log directory `{}`: {err}",
            directory.display()
        )
    })?;

    let handle = Logger::try_with_str(level)
        .map_err(|err| format!("invalid log level `{level}`: {err}"))?
        .log_to_file(
            FileSpec::default()
                .directory(directory)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(config.max_file_bytes),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config.max_files),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))?;

    install_panic_hook();

    info!(
        "event=logging_init module=logging status=ok level={} log_dir={} version={}",
        level,
        directory.display(),
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        level,
        directory: directory.to_path_buf(),
        _handle: handle,
    })
}

fn ensure_same_logger(
    active: &ActiveLogger,
    level: &'static str,
    directory: &Path,
) -> Result<(), String> {
    if active.directory != directory {
        return Err(format!(
            "logging already initialized at `{}`; refusing to switch to `{}`",
            active.directory.display(),
            directory.display()
        ));
    }
    if active.level != level {
        return Err(format!(
            "logging already initialized with level `{}`; refusing to switch to `{}`",
            active.level, level
        ));
    }
    Ok(())
}

fn normalize_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error"
        )),
    }
}

fn normalize_directory(directory: &Path) -> Result<PathBuf, String> {
    if directory.as_os_str().is_empty() {
        return Err("log directory cannot be empty".to_string());
    }
    if !directory.is_absolute() {
        return Err(format!(
            "log directory must be an absolute path, got `{}`",
            directory.display()
        ));
    }
    Ok(directory.to_path_buf())
}

fn install_panic_hook() {
    if PANIC_HOOK.get().is_some() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        error!(
            "event=panic_captured module=logging status=error location={} payload={}",
            location,
            panic_summary(panic_info)
        );
        previous_hook(panic_info);
    }));

    let _ = PANIC_HOOK.set(());
}

/// Panic payloads may carry record content; keep one capped line.
fn panic_summary(info: &std::panic::PanicHookInfo<'_>) -> String {
    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    single_line(&payload, MAX_PANIC_PAYLOAD_CHARS)
}

fn single_line(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    let mut capped: String = flattened.chars().take(max_chars).collect();
    if flattened.chars().count() > max_chars {
        capped.push_str("...");
    }
    capped
}
