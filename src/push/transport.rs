//! Transport seam for the push channel and its WebSocket implementation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;
use zeroize::Zeroizing;

use crate::constants::{HANDSHAKE_TIMEOUT, WS_CLOSE_TIMEOUT};
use crate::error::TransportError;
use crate::logging::{RemoteMonitoring, RequestLog, ResponseLog};
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Everything needed to open the event stream.
#[derive(Clone)]
pub struct PushConnectRequest {
    /// Event endpoint, including the `client` query parameter.
    pub url: Url,
    /// Value of the `Authorization` header.
    pub authorization: Zeroizing<String>,
}

impl fmt::Debug for PushConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushConnectRequest")
            .field("url", &self.url.as_str())
            .field("authorization", &"[REDACTED]")
            .finish()
    }
}

/// Inbound frame, as seen by the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    /// Binary payload (JSON-encoded event).
    Binary(Vec<u8>),
    /// Text payload; accepted but never forwarded.
    Text(String),
    /// The server closed the connection.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Write side of an open push connection.
#[async_trait]
pub trait PushSink: Send {
    /// Send a liveness ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame and shut the write side.
    async fn close(&mut self);
}

/// Read side of an open push connection.
#[async_trait]
pub trait PushStream: Send {
    /// Wait for the next frame. `None` means the stream ended.
    async fn next_frame(&mut self) -> Option<Result<PushFrame, TransportError>>;
}

/// Connection halves returned by a successful handshake.
pub type PushConnection = (Box<dyn PushSink>, Box<dyn PushStream>);

/// Opens push connections.
#[async_trait]
pub trait PushTransport: Send + Sync + fmt::Debug {
    /// Perform the handshake. A certificate the trust validator rejects
    /// must surface as [`TransportError::TrustRejected`].
    async fn connect(&self, request: PushConnectRequest) -> Result<PushConnection, TransportError>;
}

/// WebSocket push transport using the pinning TLS configuration.
#[derive(Clone)]
pub struct WsPushTransport {
    tls: Arc<rustls::ClientConfig>,
    monitoring: RemoteMonitoring,
}

impl fmt::Debug for WsPushTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsPushTransport")
            .field("monitoring", &self.monitoring)
            .finish_non_exhaustive()
    }
}

impl WsPushTransport {
    /// Transport whose `wss://` handshakes use `tls`.
    pub fn new(tls: Arc<rustls::ClientConfig>, monitoring: RemoteMonitoring) -> Self {
        Self { tls, monitoring }
    }
}

#[async_trait]
impl PushTransport for WsPushTransport {
    async fn connect(&self, request: PushConnectRequest) -> Result<PushConnection, TransportError> {
        let host = request.url.host_str().unwrap_or_default().to_string();
        let ws_request = ws::build_request(
            request.url.as_str(),
            &[("Authorization", request.authorization.as_str())],
        )
        .map_err(|e| TransportError::HandshakeFailed(format!("{e:#}")))?;

        let headers: Vec<(&str, &str)> = ws_request
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
            .collect();
        self.monitoring
            .log_request(&RequestLog::new("GET", &request.url, headers));

        let connector = tokio_tungstenite::Connector::Rustls(Arc::clone(&self.tls));
        let connected = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws::connect(ws_request, Some(connector)))
            .await
            .map_err(|_elapsed| TransportError::HandshakeFailed("handshake timed out".to_string()))?;

        let (writer, reader, status) = connected.map_err(|e| classify_connect_error(&e, &host))?;
        self.monitoring
            .log_response(&ResponseLog::new(&request.url, status));

        Ok((Box::new(WsPushSink { writer }), Box::new(WsPushStream { reader })))
    }
}

/// Map a handshake error onto the taxonomy, recognising certificate
/// rejections anywhere in the source chain.
pub(crate) fn classify_connect_error(err: &anyhow::Error, host: &str) -> TransportError {
    let certificate_rejected = err.chain().any(|cause| {
        let rustls_error = cause.downcast_ref::<rustls::Error>().or_else(|| {
            cause
                .downcast_ref::<std::io::Error>()
                .and_then(std::io::Error::get_ref)
                .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        });
        matches!(rustls_error, Some(rustls::Error::InvalidCertificate(_)))
    });

    if certificate_rejected {
        TransportError::TrustRejected {
            host: host.to_string(),
        }
    } else {
        TransportError::HandshakeFailed(format!("{err:#}"))
    }
}

struct WsPushSink {
    writer: WsWriter,
}

#[async_trait]
impl PushSink for WsPushSink {
    async fn ping(&mut self) -> Result<(), TransportError> {
        self.writer
            .send_ping(Vec::new())
            .await
            .map_err(|e| TransportError::ReceiveFailed(format!("{e:#}")))
    }

    async fn close(&mut self) {
        let result = tokio::time::timeout(WS_CLOSE_TIMEOUT, async {
            self.writer.send_close().await?;
            self.writer.close().await
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("[Ws] Close did not complete cleanly: {e:#}"),
            Err(_elapsed) => log::debug!("[Ws] Close timed out"),
        }
    }
}

struct WsPushStream {
    reader: WsReader,
}

#[async_trait]
impl PushStream for WsPushStream {
    async fn next_frame(&mut self) -> Option<Result<PushFrame, TransportError>> {
        let frame = match self.reader.recv().await? {
            Ok(WsMessage::Binary(data)) => PushFrame::Binary(data),
            Ok(WsMessage::Text(text)) => PushFrame::Text(text),
            Ok(WsMessage::Close { code, reason }) => PushFrame::Close { code, reason },
            Err(e) => return Some(Err(TransportError::ReceiveFailed(format!("{e:#}")))),
        };
        Some(Ok(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_error_in_io_error_is_trust_rejection() {
        let tls = rustls::Error::InvalidCertificate(rustls::CertificateError::ApplicationVerificationFailure);
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, tls);
        let err = anyhow::Error::new(io).context("WebSocket connect failed");
        assert_eq!(
            classify_connect_error(&err, "push.example.com"),
            TransportError::TrustRejected {
                host: "push.example.com".into()
            }
        );
    }

    #[test]
    fn test_direct_rustls_error_is_trust_rejection() {
        let err = anyhow::Error::new(rustls::Error::InvalidCertificate(rustls::CertificateError::Expired));
        assert!(classify_connect_error(&err, "h").is_trust_rejection());
    }

    #[test]
    fn test_other_errors_are_handshake_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = anyhow::Error::new(io).context("WebSocket connect failed");
        assert!(matches!(
            classify_connect_error(&err, "h"),
            TransportError::HandshakeFailed(msg) if msg.contains("refused")
        ));
    }

    #[test]
    fn test_connect_request_debug_redacts_authorization() {
        let request = PushConnectRequest {
            url: Url::parse("wss://push.example.com/await?client=c").unwrap(),
            authorization: Zeroizing::new("Bearer secret".to_string()),
        };
        assert!(!format!("{request:?}").contains("secret"));
    }
}
