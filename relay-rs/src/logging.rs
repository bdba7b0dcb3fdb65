//! Tracing subscriber setup
//!
//! The level filter sits behind a reload layer so a configuration reload can
//! raise or lower verbosity without restarting the process.

use crate::config::LogLevel;
use crate::error::{RelayError, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Handle on the global verbosity threshold
#[derive(Clone)]
pub struct LevelHandle {
    inner: reload::Handle<LevelFilter, Registry>,
}

impl From<reload::Handle<LevelFilter, Registry>> for LevelHandle {
    fn from(inner: reload::Handle<LevelFilter, Registry>) -> Self {
        Self { inner }
    }
}

impl LevelHandle {
    pub fn set(&self, level: LogLevel) {
        let filter = LevelFilter::from(level);
        if let Err(e) = self.inner.modify(|current| *current = filter) {
            tracing::warn!("Failed to change log level to {}: {}", level, e);
        }
    }

    pub fn current(&self) -> Option<LevelFilter> {
        self.inner.clone_current()
    }
}

/// Install the global subscriber
///
/// Logs go to `log_file` (appended, no ANSI colours) when given, to stderr
/// otherwise.
pub fn init(level: LogLevel, log_file: Option<&Path>) -> Result<LevelHandle> {
    let (filter, handle) = reload::Layer::new(LevelFilter::from(level));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    RelayError::Config(format!(
                        "Failed to open log file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let stderr_layer = if file_layer.is_none() {
        Some(fmt::layer().with_writer(std::io::stderr))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| RelayError::Config(format!("Failed to install log subscriber: {}", e)))?;

    Ok(LevelHandle::from(handle))
}
