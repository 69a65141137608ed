// src/utils/logger.rs
use crate::err;
use crate::utils::error::Error;
use crate::utils::path::get_log_dir;
use std::fs;
use std::path::PathBuf;
use time::macros::format_description;
use tracing_appender::rolling;
use tracing_subscriber::{
    fmt::{self, time::LocalTime},
    layer::SubscriberExt,
    registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const DEFAULT_FILE_PREFIX: &str = "locale-sync.log";
const DEFAULT_LEVEL: &str = "info";

/// Installs the global `tracing` subscriber: env-filtered, stdout plus a daily rolling file.
#[derive(Debug)]
pub struct LoggerBuilder {
    log_dir: PathBuf,
    file_prefix: String,
    default_level: String,
    stdout: bool,
    file: bool,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerBuilder {
    pub fn new() -> Self {
        LoggerBuilder {
            log_dir: get_log_dir(),
            file_prefix: DEFAULT_FILE_PREFIX.into(),
            default_level: DEFAULT_LEVEL.into(),
            stdout: true,
            file: true,
        }
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    pub fn default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    pub fn stdout(mut self, enabled: bool) -> Self {
        self.stdout = enabled;
        self
    }

    pub fn file(mut self, enabled: bool) -> Self {
        self.file = enabled;
        self
    }

    /// Fails if a global subscriber is already installed.
    pub fn init(self) -> Result<(), Error> {
        let time_format = LocalTime::new(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        ));

        let file_layer = if self.file {
            fs::create_dir_all(&self.log_dir)?;
            let file_appender = rolling::daily(&self.log_dir, &self.file_prefix);
            Some(
                fmt::layer()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_thread_names(true)
                    .with_thread_ids(true)
                    .with_timer(time_format.clone())
                    .boxed(),
            )
        } else {
            None
        };

        let stdout_layer = self.stdout.then(|| {
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(false)
                .with_thread_names(true)
                .with_thread_ids(true)
                .with_timer(time_format)
                .boxed()
        });

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.default_level));

        registry()
            .with(filter)
            .with(file_layer)
            .with(stdout_layer)
            .try_init()
            .map_err(|e| err!("failed to install log subscriber: {}", e))?;
        Ok(())
    }
}
