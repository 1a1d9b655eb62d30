//! Logging for the audio core
//!
//! Every subsystem reports through the `log_*!` macros, which tag the entry
//! with a [`LogModule`] and forward it to `tracing`. Failures are never
//! thrown across component boundaries; they are logged here and the caller
//! returns to a safe state.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Log levels, ordered from quietest to most verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Nothing = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
    All = 5,
}

impl LogLevel {
    /// Create a LogLevel from an integer (e.g. a `-v` count offset)
    pub fn from_i32(level: i32) -> Self {
        match level {
            0 => LogLevel::Nothing,
            1 => LogLevel::Error,
            2 => LogLevel::Warning,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::All,
            _ if level > 5 => LogLevel::All,
            _ => LogLevel::Nothing,
        }
    }

    /// The `EnvFilter` directive matching this level
    pub fn filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Nothing => "off",
            LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::All => "trace",
        }
    }
}

/// Subsystem a log entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogModule {
    Audio,
    Config,
    Core,
    System,
}

impl LogModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogModule::Audio => "audio",
            LogModule::Config => "config",
            LogModule::Core => "core",
            LogModule::System => "system",
        }
    }
}

/// Add a log entry for `module` at `level`
pub fn log_add(level: LogLevel, module: LogModule, message: &str) {
    let module = module.as_str();
    match level {
        LogLevel::Nothing => {}
        LogLevel::Error => tracing::error!(module = module, "{}", message),
        LogLevel::Warning => tracing::warn!(module = module, "{}", message),
        LogLevel::Info => tracing::info!(module = module, "{}", message),
        LogLevel::Debug => tracing::debug!(module = module, "{}", message),
        LogLevel::All => tracing::trace!(module = module, "{}", message),
    }
}

/// Install the process-wide subscriber
///
/// `RUST_LOG` takes precedence over `level` when it is set.
pub fn log_init(level: LogLevel) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {}", e))
}

/// Convenience macro for errors
#[macro_export]
macro_rules! log_error {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::log_add($crate::logging::LogLevel::Error, $module, &format!($($arg)*))
    };
}

/// Convenience macro for warnings
#[macro_export]
macro_rules! log_warning {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::log_add($crate::logging::LogLevel::Warning, $module, &format!($($arg)*))
    };
}

/// Convenience macro for info messages
#[macro_export]
macro_rules! log_info {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::log_add($crate::logging::LogLevel::Info, $module, &format!($($arg)*))
    };
}

/// Convenience macro for debug messages
#[macro_export]
macro_rules! log_debug {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::log_add($crate::logging::LogLevel::Debug, $module, &format!($($arg)*))
    };
}
