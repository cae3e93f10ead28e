//! Session owner wiring the dispatcher, trust validator and push channel.
//!
//! The three components are peers: they share the trust validator (through
//! one rustls client config) and nothing else. The session owns the
//! credential holder and tells the push channel when it changes.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::credential::{Credential, CredentialHolder, CredentialSource};
use crate::dispatcher::{ReqwestTransport, RequestDispatcher};
use crate::logging::RemoteMonitoring;
use crate::push::{PushChannel, PushChannelConfig, WsPushTransport};
use crate::trust::{self, TrustValidator};

/// A configured transport: request dispatch plus the push channel.
#[derive(Debug)]
pub struct TransportSession {
    config: Config,
    trust: Arc<TrustValidator>,
    credentials: Arc<CredentialHolder>,
    dispatcher: RequestDispatcher,
    push: PushChannel,
}

impl TransportSession {
    /// Build every component from `config`. `proxy` applies to HTTP
    /// requests only (see [`crate::proxy::configured_proxy`]).
    ///
    /// Must be called from within a tokio runtime; the push channel actor
    /// is spawned immediately but stays idle until a consumer or keep-open
    /// is set.
    pub fn new(
        config: Config,
        proxy: Option<reqwest::Proxy>,
        monitoring: RemoteMonitoring,
    ) -> Result<Self> {
        let trust = Arc::new(
            TrustValidator::with_webpki_roots(config.backend.pinned_keys.clone())
                .context("Failed to build trust validator")?,
        );
        let tls = trust::client_config(Arc::clone(&trust))?;
        log::info!(
            "[Trust] {} pinned key(s) for {}",
            trust.entries().len(),
            config.backend.title
        );

        let http = ReqwestTransport::new(
            config.backend.endpoints.backend_url.clone(),
            tls.clone(),
            proxy,
            monitoring.clone(),
        )?;
        let dispatcher = RequestDispatcher::new(Arc::new(http));

        let credentials = Arc::new(CredentialHolder::default());
        let push_config = PushChannelConfig {
            ws_base_url: config.push_base_url()?,
            keepalive_interval: config.keepalive_interval(),
            reconnect: config.reconnect,
        };
        let push_transport = WsPushTransport::new(Arc::new(tls), monitoring);
        let push = PushChannel::spawn(
            push_config,
            Arc::new(push_transport),
            Arc::clone(&credentials) as Arc<dyn CredentialSource>,
        );

        Ok(Self {
            config,
            trust,
            credentials,
            dispatcher,
            push,
        })
    }

    /// Replace the credential and let the push channel re-evaluate.
    pub fn set_credential(&self, credential: Option<Credential>) {
        self.credentials.replace(credential);
        self.push.credential_did_change();
    }

    /// Effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared trust validator.
    pub fn trust(&self) -> &Arc<TrustValidator> {
        &self.trust
    }

    /// Unauthenticated request dispatcher.
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Push channel handle.
    pub fn push(&self) -> &PushChannel {
        &self.push
    }
}
