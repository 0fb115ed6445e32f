//! Routing SDK log output.
use log::{debug, error, info, warn};
use rsbridge_sys::{self as ffi, LogSeverity};

use crate::error::Result;
use crate::host::Host;

#[cfg(test)]
mod tests;

/// Receives SDK log messages. Called on whatever thread the SDK logs from.
pub trait LogHandler: Send + Sync {
    fn handle(&self, severity: LogSeverity, message: &str);
}

/// LogHandler Implementation using [`log`](https://github.com/rust-lang/log)
pub struct LogRS;

impl LogHandler for LogRS {
    fn handle(&self, severity: LogSeverity, message: &str) {
        match severity {
            LogSeverity::Debug => debug!("{message}"),
            LogSeverity::Info => info!("{message}"),
            LogSeverity::Warn => warn!("{message}"),
            LogSeverity::Error | LogSeverity::Fatal => error!("{message}"),
            LogSeverity::None => {}
        }
    }
}

struct Forward(Box<dyn LogHandler>);

impl ffi::LogCallback for Forward {
    fn on_log(&self, severity: LogSeverity, message: &str) {
        self.0.handle(severity, message);
    }
}

impl Host {
    /// Sends SDK log messages of at least `min_severity` to `handler`, replacing any previous
    /// handler.
    pub fn log_to_callback(
        &self,
        min_severity: LogSeverity,
        handler: Box<dyn LogHandler>,
    ) -> Result<()> {
        let callback = Box::new(Forward(handler));
        Ok(self.native_call(None, |sdk, error| {
            sdk.log_to_callback(min_severity, callback, error)
        })?)
    }

    /// Sends SDK log messages of at least `min_severity` to the `log` crate.
    pub fn log_to_rust(&self, min_severity: LogSeverity) -> Result<()> {
        self.log_to_callback(min_severity, Box::new(LogRS))
    }
}
