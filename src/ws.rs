//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. The push channel reaches WebSockets only through
//! this module.
//!
//! # Architecture
//!
//! [`build_request`] turns a URL plus headers into a handshake request
//! (including the generated `Sec-WebSocket-Key`), so callers can log it
//! before dialing. [`connect`] performs the handshake over a caller-supplied
//! TLS connector and returns a ([`WsWriter`], [`WsReader`]) pair that can be
//! driven from separate tasks.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::Connector;

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// WebSocket handshake request.
pub type WsRequest = tungstenite::handshake::client::Request;

/// Data or close frame received from the server.
///
/// Control frames never surface here; tungstenite answers pings itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Close frame. `code` is 1005 when the peer sent none.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a ping frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_ping(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Ping(data))
            .await
            .context("WebSocket send_ping failed")
    }

    /// Send a close frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .context("WebSocket send_close failed")
    }

    /// Flush pending writes and close the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Next data or close frame; `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        use tungstenite::Message;

        while let Some(next) = self.stream.next().await {
            let message = match next {
                Ok(message) => message,
                Err(e) => return Some(Err(anyhow::Error::new(e).context("WebSocket read error"))),
            };
            match message {
                Message::Text(text) => return Some(Ok(WsMessage::Text(text))),
                Message::Binary(data) => return Some(Ok(WsMessage::Binary(data))),
                Message::Close(frame) => {
                    let (code, reason) = frame.map_or((1005, String::new()), |f| {
                        (u16::from(f.code), f.reason.into_owned())
                    });
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        None
    }
}

/// Build a handshake request for `url` with extra headers.
///
/// # Errors
///
/// Returns an error if the URL is not a WebSocket URL or a header is malformed.
pub fn build_request(url: &str, headers: &[(&str, &str)]) -> Result<WsRequest> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for &(name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }
    Ok(request)
}

/// Perform the WebSocket handshake for `request`.
///
/// With `connector` set, `wss://` connections use it instead of the
/// default TLS configuration. Returns the split halves and the HTTP
/// status of the upgrade response.
///
/// # Errors
///
/// Returns an error if the TCP connection, TLS handshake or upgrade fails.
/// TLS failures keep the underlying `rustls::Error` in the error chain.
pub async fn connect(
    request: WsRequest,
    connector: Option<Connector>,
) -> Result<(WsWriter, WsReader, u16)> {
    let (ws_stream, response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
            .await
            .context("WebSocket connect failed")?;

    let status = response.status().as_u16();
    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }, status))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme() {
        assert_eq!(http_to_ws_scheme("https://example.com"), "wss://example.com");
        assert_eq!(http_to_ws_scheme("http://localhost:3000"), "ws://localhost:3000");
        assert_eq!(http_to_ws_scheme("wss://example.com/await"), "wss://example.com/await");
    }

    #[test]
    fn test_http_to_ws_scheme_only_rewrites_prefix() {
        assert_eq!(
            http_to_ws_scheme("https://example.com/redirect?to=https://other"),
            "wss://example.com/redirect?to=https://other"
        );
    }

    #[test]
    fn test_build_request_sets_headers_and_key() {
        let request = build_request(
            "wss://push.example.com/await?client=abc",
            &[("Authorization", "Bearer token")],
        )
        .unwrap();
        assert_eq!(request.headers()["Authorization"], "Bearer token");
        assert!(request.headers().contains_key("sec-websocket-key"));
        assert_eq!(request.uri().path(), "/await");
    }

    #[test]
    fn test_build_request_rejects_bad_header() {
        let result = build_request("wss://example.com", &[("Authorization", "line\nbreak")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_build_request_invalid_url_returns_error() {
        assert!(build_request("not-a-url", &[]).is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let request = build_request("ws://127.0.0.1:1/invalid", &[]).unwrap();
        assert!(connect(request, None).await.is_err());
    }
}
