//! Observability helpers: redacted request records and the injected
//! monitoring sink.

mod monitoring;
mod request_log;

pub use monitoring::{MonitoringLevel, RemoteLogger, RemoteMonitoring};
pub use request_log::{
    endpoint_description, redacted_and_truncated, truncated, RequestLog, ResponseLog,
};
