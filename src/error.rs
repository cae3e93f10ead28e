//! Transport error taxonomy.
//!
//! Every failure the transport core reports to its callers is one of the
//! [`TransportError`] variants. None of them is fatal to the process: the
//! dispatcher returns admission errors synchronously, and the push channel
//! turns connection errors into state transitions plus a log entry.

use std::fmt;

/// Errors surfaced by the dispatcher and the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The dispatcher already has the maximum number of requests in flight.
    AdmissionRejected,
    /// The request factory produced no request.
    InvalidRequest,
    /// The server's certificate chain failed validation or did not match
    /// the pinned keys for the host.
    TrustRejected {
        /// Host the handshake was made against.
        host: String,
    },
    /// The connection handshake failed for a reason other than trust.
    HandshakeFailed(String),
    /// Reading from an established connection failed.
    ReceiveFailed(String),
    /// An inbound payload could not be decoded.
    DecodeFailed(String),
}

impl TransportError {
    /// Returns `true` for trust rejections.
    #[must_use]
    pub fn is_trust_rejection(&self) -> bool {
        matches!(self, Self::TrustRejected { .. })
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdmissionRejected => write!(f, "Request rejected: dispatcher at capacity"),
            Self::InvalidRequest => write!(f, "Request rejected: factory produced no request"),
            Self::TrustRejected { host } => write!(f, "Server trust rejected for {host}"),
            Self::HandshakeFailed(msg) => write!(f, "Handshake failed: {msg}"),
            Self::ReceiveFailed(msg) => write!(f, "Receive failed: {msg}"),
            Self::DecodeFailed(msg) => write!(f, "Decode failed: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            TransportError::AdmissionRejected.to_string(),
            "Request rejected: dispatcher at capacity"
        );
        assert_eq!(
            TransportError::TrustRejected { host: "example.com".into() }.to_string(),
            "Server trust rejected for example.com"
        );
        assert_eq!(
            TransportError::DecodeFailed("eof".into()).to_string(),
            "Decode failed: eof"
        );
    }

    #[test]
    fn test_is_trust_rejection() {
        assert!(TransportError::TrustRejected { host: String::new() }.is_trust_rejection());
        assert!(!TransportError::HandshakeFailed("refused".into()).is_trust_rejection());
    }
}
