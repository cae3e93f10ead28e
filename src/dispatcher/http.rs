//! reqwest-backed [`RequestTransport`].

use std::sync::Arc;

use anyhow::{Context, Result};
use url::Url;

use super::{CompletionSlot, RequestTransport, TransportRequest, TransportResponse};
use crate::constants::HTTP_REQUEST_TIMEOUT;
use crate::logging::{RemoteMonitoring, RequestLog, ResponseLog};

/// Runs dispatched requests on a shared reqwest client.
///
/// Each request runs on its own tokio task. The task logs the redacted
/// request and response, releases the dispatcher slot, then hands the
/// outcome to the request's completion handler.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Arc<Url>,
    monitoring: RemoteMonitoring,
    runtime: tokio::runtime::Handle,
}

impl ReqwestTransport {
    /// Build a transport for `base_url` using the pinning TLS `config` and
    /// an optional proxy. Must be called from within a tokio runtime.
    pub fn new(
        base_url: Url,
        tls: rustls::ClientConfig,
        proxy: Option<reqwest::Proxy>,
        monitoring: RemoteMonitoring,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(HTTP_REQUEST_TIMEOUT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy);
        }
        let client = builder.build().context("failed to build HTTP client")?;
        Self::with_client(base_url, client, monitoring)
    }

    /// Build a transport around an existing client.
    pub fn with_client(base_url: Url, client: reqwest::Client, monitoring: RemoteMonitoring) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("ReqwestTransport requires a tokio runtime")?;
        Ok(Self {
            client,
            base_url: Arc::new(base_url),
            monitoring,
            runtime,
        })
    }

    fn build(&self, request: &TransportRequest) -> Result<reqwest::Request> {
        let url = self
            .base_url
            .join(request.path().trim_start_matches('/'))
            .with_context(|| format!("invalid request path: {}", request.path()))?;

        let mut builder = self.client.request(request.method().clone(), url);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }
        builder.build().context("failed to build request")
    }
}

async fn execute(
    client: &reqwest::Client,
    monitoring: &RemoteMonitoring,
    prepared: reqwest::Request,
) -> TransportResponse {
    monitoring.log_request(&RequestLog::from_reqwest(&prepared));

    let response = match client.execute(prepared).await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("[Dispatcher] Request failed: {e}");
            return TransportResponse::Failed(e.to_string());
        }
    };

    let status = response.status().as_u16();
    monitoring.log_response(&ResponseLog::new(response.url(), status));

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("[Dispatcher] Failed to read response body: {e}");
            return TransportResponse::Failed(e.to_string());
        }
    };
    let body = if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(&bytes)
            .map_err(|e| log::debug!("[Dispatcher] Response body is not JSON: {e}"))
            .ok()
    };
    TransportResponse::Completed { status, body }
}

impl RequestTransport for ReqwestTransport {
    fn send(&self, request: TransportRequest, slot: CompletionSlot) {
        let prepared = match self.build(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                log::warn!("[Dispatcher] {e:#}");
                slot.complete();
                request.complete(TransportResponse::Failed(format!("{e:#}")));
                return;
            }
        };

        let client = self.client.clone();
        let monitoring = self.monitoring.clone();
        self.runtime.spawn(async move {
            let response = execute(&client, &monitoring, prepared).await;
            slot.complete();
            request.complete(response);
        });
    }
}
