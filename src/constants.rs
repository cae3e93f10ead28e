//! Transport-wide constants.
//!
//! This module centralizes the fixed policy values and timeouts used by the
//! dispatcher, the push channel and the log redaction layer.
//!
//! # Categories
//!
//! - **Admission**: dispatcher capacity
//! - **Timeouts**: network and teardown timeouts
//! - **Push channel**: keepalive and reconnect defaults
//! - **Redaction**: log masking parameters

use std::time::Duration;

// ============================================================================
// Admission
// ============================================================================

/// Maximum number of unauthenticated requests in flight at once.
///
/// Fixed policy: the dispatcher refuses the fourth concurrent request
/// with `CapacityExceeded` instead of queueing it.
pub const MAX_CONCURRENT_REQUESTS: usize = 3;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for dispatched requests.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a push channel WebSocket handshake (TCP + TLS + upgrade).
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a local close waits for the close frame to flush.
pub const WS_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Push channel
// ============================================================================

/// Interval between liveness pings on an open push connection.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest keepalive interval the push channel will run with.
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Path appended to the backend WebSocket URL for the event stream.
pub const PUSH_ENDPOINT_PATH: &str = "await";

/// Query parameter carrying the client identifier.
pub const PUSH_CLIENT_QUERY_KEY: &str = "client";

/// Default first delay for the exponential backoff reconnect policy.
pub const DEFAULT_BACKOFF_INITIAL_SECS: u64 = 1;

/// Default cap for the exponential backoff reconnect policy.
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 60;

/// Upper bound on any backoff delay, whatever the configured cap (one day).
pub const BACKOFF_CEILING_SECS: u64 = 86_400;

/// Maximum random jitter added to a backoff delay, in milliseconds.
pub const BACKOFF_JITTER_MS: u64 = 1000;

// ============================================================================
// Redaction
// ============================================================================

/// Number of characters left visible when truncating path segments and
/// query values in logged endpoints.
pub const REDACTION_VISIBLE_CHARS: usize = 3;

/// Replacement value for sensitive header values in logged records.
pub const REDACTION_MASK: &str = "*******";
