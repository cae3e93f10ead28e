//! Injected remote monitoring sink.
//!
//! Components receive a [`RemoteMonitoring`] value at construction instead of
//! reaching for a process-wide logger. It always mirrors records to the
//! `log` facade at debug level and forwards them to an optional
//! [`RemoteLogger`] supplied by the host application.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{RequestLog, ResponseLog};

/// Severity attached to records forwarded to a [`RemoteLogger`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal operational records.
    #[default]
    Info,
    /// Noteworthy but expected conditions.
    Notice,
    /// Recoverable problems.
    Warn,
    /// Failures.
    Error,
    /// Failures requiring immediate attention.
    Critical,
}

impl MonitoringLevel {
    /// Closest `log` crate level.
    #[must_use]
    pub fn as_log_level(self) -> log::Level {
        match self {
            Self::Debug => log::Level::Debug,
            Self::Info | Self::Notice => log::Level::Info,
            Self::Warn => log::Level::Warn,
            Self::Error | Self::Critical => log::Level::Error,
        }
    }
}

impl fmt::Display for MonitoringLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Destination for monitoring records outside the process.
pub trait RemoteLogger: Send + Sync {
    /// Record one message.
    fn log(
        &self,
        message: &str,
        error: Option<&(dyn std::error::Error + 'static)>,
        level: MonitoringLevel,
    );
}

/// Monitoring handle passed to each transport component.
#[derive(Clone, Default)]
pub struct RemoteMonitoring {
    level: MonitoringLevel,
    logger: Option<Arc<dyn RemoteLogger>>,
}

impl fmt::Debug for RemoteMonitoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMonitoring")
            .field("level", &self.level)
            .field("remote", &self.logger.is_some())
            .finish()
    }
}

impl RemoteMonitoring {
    /// Forward records to `logger` at `level`.
    pub fn new(level: MonitoringLevel, logger: Arc<dyn RemoteLogger>) -> Self {
        Self {
            level,
            logger: Some(logger),
        }
    }

    /// Mirror records to the `log` facade only.
    pub fn local_only(level: MonitoringLevel) -> Self {
        Self { level, logger: None }
    }

    /// Level attached to forwarded records.
    pub fn level(&self) -> MonitoringLevel {
        self.level
    }

    /// Record a free-form message.
    pub fn log(&self, message: &str, error: Option<&(dyn std::error::Error + 'static)>) {
        match error {
            Some(err) => log::debug!("[Monitoring] {message} ({err})"),
            None => log::debug!("[Monitoring] {message}"),
        }
        if let Some(logger) = &self.logger {
            logger.log(message, error, self.level);
        }
    }

    /// Record an outgoing request as `REQUEST: {json}`.
    pub fn log_request(&self, request: &RequestLog) {
        self.log_encoded("REQUEST", request);
    }

    /// Record a received response as `RESPONSE: {json}`.
    pub fn log_response(&self, response: &ResponseLog) {
        self.log_encoded("RESPONSE", response);
    }

    fn log_encoded<T: Serialize>(&self, prefix: &str, record: &T) {
        match serde_json::to_string(record) {
            Ok(json) => self.log(&format!("{prefix}: {json}"), None),
            Err(e) => log::warn!("[Monitoring] Failed to encode {prefix} record: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use url::Url;

    #[derive(Default)]
    struct RecordingLogger {
        lines: Mutex<Vec<(String, MonitoringLevel)>>,
    }

    impl RemoteLogger for RecordingLogger {
        fn log(
            &self,
            message: &str,
            _error: Option<&(dyn std::error::Error + 'static)>,
            level: MonitoringLevel,
        ) {
            self.lines.lock().unwrap().push((message.to_string(), level));
        }
    }

    #[test]
    fn test_request_is_forwarded_with_prefix_and_level() {
        let logger = Arc::new(RecordingLogger::default());
        let monitoring = RemoteMonitoring::new(MonitoringLevel::Notice, Arc::clone(&logger) as Arc<dyn RemoteLogger>);

        let url = Url::parse("https://example.com/push/tokens").unwrap();
        monitoring.log_request(&RequestLog::new(
            "POST",
            &url,
            [("Authorization", "Bearer secret-token-value")],
        ));

        let lines = logger.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        let (message, level) = &lines[0];
        assert!(message.starts_with("REQUEST: {"));
        assert!(message.contains("example.com/pus*/tok***"));
        assert!(!message.contains("secret-token-value"));
        assert_eq!(*level, MonitoringLevel::Notice);
    }

    #[test]
    fn test_response_is_forwarded() {
        let logger = Arc::new(RecordingLogger::default());
        let monitoring = RemoteMonitoring::new(MonitoringLevel::Info, Arc::clone(&logger) as Arc<dyn RemoteLogger>);

        let url = Url::parse("https://example.com/v2/access").unwrap();
        monitoring.log_response(&ResponseLog::new(&url, 403));

        let lines = logger.lines.lock().unwrap();
        assert_eq!(
            lines[0].0,
            r#"RESPONSE: {"endpoint":"example.com/v2/acc***","status":403}"#
        );
    }

    #[test]
    fn test_local_only_has_no_remote() {
        let monitoring = RemoteMonitoring::local_only(MonitoringLevel::Warn);
        monitoring.log("nothing forwarded", None);
        assert_eq!(monitoring.level(), MonitoringLevel::Warn);
        assert!(format!("{monitoring:?}").contains("remote: false"));
    }

    #[test]
    fn test_level_ordering_and_serde() {
        assert!(MonitoringLevel::Critical > MonitoringLevel::Warn);
        assert_eq!(
            serde_json::from_str::<MonitoringLevel>("\"notice\"").unwrap(),
            MonitoringLevel::Notice
        );
        assert_eq!(MonitoringLevel::Notice.as_log_level(), log::Level::Info);
    }
}
