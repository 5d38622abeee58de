//! Logging utilities
//!
//! Provides logging configuration and helpers.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Log level configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Pick the level from the global CLI verbosity flags
    pub fn from_flags(verbose: bool, debug: bool) -> Self {
        if debug {
            LogLevel::Debug
        } else if verbose {
            LogLevel::Info
        } else {
            LogLevel::Warn
        }
    }

    /// Emit a single line of captured command output at this level
    pub fn log_line(self, line: &str) {
        match self {
            LogLevel::Trace => tracing::trace!("out: {}", line),
            LogLevel::Debug => tracing::debug!("out: {}", line),
            LogLevel::Info => tracing::info!("out: {}", line),
            LogLevel::Warn => tracing::warn!("out: {}", line),
            LogLevel::Error => tracing::error!("out: {}", line),
        }
    }
}

/// Initialize the logger with specified level
pub fn init_logger(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("guestrun={}", level.to_tracing_level())));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_flags() {
        assert_eq!(LogLevel::from_flags(false, false), LogLevel::Warn);
        assert_eq!(LogLevel::from_flags(true, false), LogLevel::Info);
        assert_eq!(LogLevel::from_flags(true, true), LogLevel::Debug);
    }
}
