//! Pluggable log sink with a `tracing`-backed default.
//!
//! Handlers log through [`crate::Task::log`], which forwards to the
//! server's configured [`Logger`]. The default sink emits structured
//! `tracing` events; embedders that already own a logging pipeline can
//! install their own sink with `Server::set_logger`.

use std::fmt;

/// Severity of a log message emitted through the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// A log sink. Implementations must tolerate concurrent calls.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Default sink forwarding to the `tracing` ecosystem.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!("{message}"),
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CaptureLogger(Mutex<Vec<(LogLevel, String)>>);

    impl Logger for CaptureLogger {
        fn log(&self, level: LogLevel, message: &str) {
            self.0.lock().unwrap().push((level, message.to_string()));
        }
    }

    #[test]
    fn custom_sink_receives_messages() {
        let sink = CaptureLogger(Mutex::new(Vec::new()));
        sink.log(LogLevel::Warn, "slow route");
        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (LogLevel::Warn, "slow route".to_string()));
    }

    #[test]
    fn level_display_is_lowercase() {
        assert_eq!(LogLevel::Error.to_string(), "error");
        assert_eq!(LogLevel::Trace.to_string(), "trace");
    }
}
