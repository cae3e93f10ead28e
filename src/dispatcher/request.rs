//! Request and response values carried through the dispatcher.

use std::fmt;

use reqwest::Method;

/// Callback receiving the outcome of a dispatched request.
pub type ResponseHandler = Box<dyn FnOnce(TransportResponse) + Send>;

/// An outgoing request relative to the backend base URL.
pub struct TransportRequest {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    handler: Option<ResponseHandler>,
}

impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers.len())
            .field("has_body", &self.body.is_some())
            .finish_non_exhaustive()
    }
}

impl TransportRequest {
    /// Request with an arbitrary method.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            handler: None,
        }
    }

    /// `GET path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path` with a JSON body.
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Register the completion handler.
    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(TransportResponse) + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the backend base URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Extra headers.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// JSON body, if any.
    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    /// Deliver `response` to the completion handler, if one was registered.
    ///
    /// A request dropped without completing reports
    /// [`TransportResponse::Cancelled`].
    pub fn complete(mut self, response: TransportResponse) {
        if let Some(handler) = self.handler.take() {
            handler(response);
        }
    }
}

impl Drop for TransportRequest {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler(TransportResponse::Cancelled);
        }
    }
}

/// Outcome of a dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportResponse {
    /// The server answered.
    Completed {
        /// HTTP status code.
        status: u16,
        /// Parsed JSON body, when the body was JSON.
        body: Option<serde_json::Value>,
    },
    /// No response was received (connect, TLS or timeout failure).
    Failed(String),
    /// The request was dropped before completing.
    Cancelled,
}

impl TransportResponse {
    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Completed { status, .. } => Some(*status),
            Self::Failed(_) | Self::Cancelled => None,
        }
    }

    /// Returns `true` for a 2xx answer.
    pub fn is_success(&self) -> bool {
        self.status().is_some_and(|s| (200..300).contains(&s))
    }
}
