use std::{
    io::{self, IsTerminal},
    str::FromStr,
};

use serde::Deserialize;

use crate::logger::{error::LoggerError, format::LoggerFormat};

/// Filter directive override, e.g. `stagehand_core=debug,info`.
pub const LOG_ENV: &str = "STAGEHAND_LOG";
/// Format override: `text`, `json` or `journald`.
pub const LOG_FORMAT_ENV: &str = "STAGEHAND_LOG_FORMAT";

/// Stream the text and json formats write to.
///
/// Plugin processes must use [`LoggerOutput::Stderr`]: their stdout carries the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerOutput {
    #[default]
    Stdout,
    Stderr,
}

impl LoggerOutput {
    fn is_terminal(self) -> bool {
        match self {
            LoggerOutput::Stdout => io::stdout().is_terminal(),
            LoggerOutput::Stderr => io::stderr().is_terminal(),
        }
    }
}

impl FromStr for LoggerOutput {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(LoggerOutput::Stdout),
            "stderr" => Ok(LoggerOutput::Stderr),
            _ => Err(LoggerError::InvalidOutput(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
    pub output: LoggerOutput,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let output = LoggerOutput::default();
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color: output.is_terminal(),
            output,
        }
    }
}

impl LoggerConfig {
    /// Defaults for a plugin process: everything goes to stderr.
    pub fn plugin() -> Self {
        Self {
            use_color: LoggerOutput::Stderr.is_terminal(),
            output: LoggerOutput::Stderr,
            ..Self::default()
        }
    }

    /// Apply [`LOG_ENV`] and [`LOG_FORMAT_ENV`] on top of `self`.
    pub fn with_env(mut self) -> Result<Self, LoggerError> {
        if let Ok(level) = std::env::var(LOG_ENV) {
            if !level.trim().is_empty() {
                self.level = level;
            }
        }
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            self.format = format.parse()?;
        }
        Ok(self)
    }
}
