//! Process-wide logging bootstrap.
//!
//! # Responsibility
//! - Start the `flexi_logger` backend at most once per process, writing
//!   either rotating files or stderr.
//! - Keep the active configuration queryable.
//!
//! # Invariants
//! - Initialization never panics.
//! - Repeating an identical initialization is a no-op; a conflicting one
//!   is rejected and the active logger keeps running.
//! - Log lines carry metadata only; bound parameter values are never
//!   logged.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const LOG_FILE_BASENAME: &str = "tablebind";
const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_FILES: usize = 5;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();

/// Where log output goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "dir")]
pub enum LogTarget {
    Stderr,
    /// Rotating files under an absolute directory.
    Directory(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub target: LogTarget,
    pub max_file_bytes: u64,
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            target: LogTarget::Stderr,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl LoggingConfig {
    pub fn stderr(level: &str) -> Self {
        Self {
            level: level.to_string(),
            ..Self::default()
        }
    }

    pub fn directory(level: &str, dir: impl Into<PathBuf>) -> Self {
        Self {
            level: level.to_string(),
            target: LogTarget::Directory(dir.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoggingError {
    #[error("unsupported log level `{0}`; expected trace|debug|info|warn|error")]
    Level(String),
    #[error("invalid log directory: {0}")]
    Directory(String),
    #[error("logging already initialized with {active}; refusing to switch to {requested}")]
    Conflict { active: String, requested: String },
    #[error("failed to start logger: {0}")]
    Backend(String),
}

struct LoggingState {
    level: &'static str,
    target: LogTarget,
    _logger: LoggerHandle,
}

/// Starts logging for the process.
///
/// # Errors
/// - `Level` for an unknown level name.
/// - `Directory` for an empty, relative, or uncreatable log directory.
/// - `Conflict` when logging already runs with a different level or target.
/// - `Backend` when `flexi_logger` fails to start.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let level = normalize_level(&config.level)?;
    let target = normalize_target(&config.target)?;

    let state = LOGGING_STATE.get_or_try_init(|| start(level, &target, config))?;
    if state.level != level {
        return Err(LoggingError::Conflict {
            active: format!("level `{}`", state.level),
            requested: format!("level `{level}`"),
        });
    }
    if state.target != target {
        return Err(LoggingError::Conflict {
            active: describe_target(&state.target),
            requested: describe_target(&target),
        });
    }
    Ok(())
}

fn start(
    level: &'static str,
    target: &LogTarget,
    config: &LoggingConfig,
) -> Result<LoggingState, LoggingError> {
    let logger = Logger::try_with_str(level).map_err(|err| LoggingError::Backend(err.to_string()))?;
    let logger = match target {
        LogTarget::Stderr => logger
            .log_to_stderr()
            .format_for_stderr(flexi_logger::detailed_format),
        LogTarget::Directory(dir) => {
            std::fs::create_dir_all(dir).map_err(|err| {
                LoggingError::Directory(format!("cannot create `{}`: {err}", dir.display()))
            })?;
            logger
                .log_to_file(
                    FileSpec::default()
                        .directory(dir.as_path())
                        .basename(LOG_FILE_BASENAME),
                )
                .rotate(
                    Criterion::Size(config.max_file_bytes.max(1)),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(config.max_files.max(1)),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
        }
    };
    let handle = logger
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    info!(
        "event=logging_init module=core status=ok level={level} target={} version={}",
        describe_target(target),
        env!("CARGO_PKG_VERSION")
    );
    Ok(LoggingState {
        level,
        target: target.clone(),
        _logger: handle,
    })
}

/// Active `(level, target)`, or `None` before initialization.
pub fn logging_status() -> Option<(&'static str, LogTarget)> {
    LOGGING_STATE
        .get()
        .map(|state| (state.level, state.target.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn normalize_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::Level(other.to_string())),
    }
}

fn normalize_target(target: &LogTarget) -> Result<LogTarget, LoggingError> {
    match target {
        LogTarget::Stderr => Ok(LogTarget::Stderr),
        LogTarget::Directory(dir) => {
            if dir.as_os_str().is_empty() {
                return Err(LoggingError::Directory("path cannot be empty".into()));
            }
            if !Path::new(dir).is_absolute() {
                return Err(LoggingError::Directory(format!(
                    "path must be absolute, got `{}`",
                    dir.display()
                )));
            }
            Ok(LogTarget::Directory(dir.clone()))
        }
    }
}

fn describe_target(target: &LogTarget) -> String {
    match target {
        LogTarget::Stderr => "stderr".to_string(),
        LogTarget::Directory(dir) => format!("directory `{}`", dir.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        init_logging, logging_status, normalize_level, normalize_target, LogTarget,
        LoggingConfig, LoggingError,
    };

    #[test]
    fn levels_are_normalized() {
        assert_eq!(normalize_level(" WARNING "), Ok("warn"));
        assert_eq!(
            normalize_level("loud"),
            Err(LoggingError::Level("loud".into()))
        );
    }

    #[test]
    fn relative_directories_are_rejected() {
        let err = normalize_target(&LogTarget::Directory("logs/dev".into())).unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: LoggingConfig = serde_json::from_str(
            r#"{"level":"info","target":{"kind":"directory","dir":"/var/log/app"}}"#,
        )
        .unwrap();
        assert_eq!(config.target, LogTarget::Directory("/var/log/app".into()));
        assert_eq!(config.max_files, 5);
    }

    #[test]
    fn init_is_idempotent_and_rejects_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig::directory("info", dir.path());

        init_logging(&config).unwrap();
        init_logging(&config).unwrap();

        let level_conflict = init_logging(&LoggingConfig::directory("debug", dir.path()));
        assert!(matches!(level_conflict, Err(LoggingError::Conflict { .. })));
        let target_conflict = init_logging(&LoggingConfig::stderr("info"));
        assert!(matches!(target_conflict, Err(LoggingError::Conflict { .. })));

        let (level, target) = logging_status().unwrap();
        assert_eq!(level, "info");
        assert_eq!(target, LogTarget::Directory(dir.path().to_path_buf()));
    }
}
