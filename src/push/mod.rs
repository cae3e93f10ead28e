//! Persistent push connection to the backend event endpoint.
//!
//! [`PushChannel`] is a cheap, cloneable handle to a background actor that
//! owns the single push connection. All state transitions happen inside
//! the actor; callers only send commands and observe the state.
//!
//! # Architecture
//!
//! ```text
//!   PushChannel (handle)                 actor task
//!         │  Command (mpsc)                  │
//!         │ ───────────────────────────────► │── connect task ── PushTransport::connect
//!         │                                  │◄─ ConnectionEvent::Connected
//!         │  watch<PushConnectionState>      │
//!         │ ◄─────────────────────────────── │── receive task (one pending read)
//!         │                                  │◄─ ConnectionEvent::Frame / ReceiveFailed
//!         │  ObserverRegistry<PushChannelEvent>
//!         │ ◄─────────────────────────────── │── keepalive interval ── PushSink::ping
//!                                            │
//!                                            └─► SerialQueue ── PushConsumer
//! ```
//!
//! # Lifecycle
//!
//! - `Idle → Connecting` when the channel was asked to stay open and the
//!   credential source yields a token and a client id.
//! - `Connecting → Open` when the handshake (gated by the trust validator)
//!   succeeds. A receive task and a keepalive timer start.
//! - `Connecting → Closed` on handshake failure; `Open → Closing → Closed`
//!   on local close, `Open → Closed` on remote close or receive error.
//! - `Closed` is re-armed to `Idle` by the next trigger: `attempt_open`,
//!   a credential change, a new consumer, or the backoff timer when
//!   [`ReconnectPolicy::ExponentialBackoff`] is configured.
//!
//! Each attempt carries a generation number; results and frames from a
//! superseded attempt are discarded.

// Rust guideline compliant 2026-02

mod actor;
mod consumer;
mod policy;
mod transport;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use url::Url;

use crate::constants::{KEEPALIVE_INTERVAL, PUSH_CLIENT_QUERY_KEY, PUSH_ENDPOINT_PATH};
use crate::credential::CredentialSource;
use crate::error::TransportError;
use crate::observers::{ObserverRegistry, Subscription};

pub use consumer::{PushConsumer, SerialQueue};
pub use policy::ReconnectPolicy;
pub use transport::{
    PushConnectRequest, PushConnection, PushFrame, PushSink, PushStream, PushTransport,
    WsPushTransport,
};

/// Lifecycle state of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushConnectionState {
    /// No connection and no attempt in progress.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Connected; receiving frames and sending keepalives.
    Open,
    /// Local close in progress.
    Closing,
    /// The last connection ended; the next trigger re-arms to `Idle`.
    Closed,
}

impl fmt::Display for PushConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Events broadcast to push channel observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushChannelEvent {
    /// The connection opened.
    Opened,
    /// The connection (or connection attempt) ended.
    Closed {
        /// Why, when the closure was not requested locally.
        error: Option<TransportError>,
    },
}

/// Push channel settings.
#[derive(Debug, Clone)]
pub struct PushChannelConfig {
    /// Backend WebSocket base URL; the event path is appended to it.
    pub ws_base_url: Url,
    /// Interval between liveness pings.
    pub keepalive_interval: Duration,
    /// Behaviour after unexpected closures.
    pub reconnect: ReconnectPolicy,
}

impl PushChannelConfig {
    /// Settings with the default keepalive and host-driven reconnects.
    pub fn new(ws_base_url: Url) -> Self {
        Self {
            ws_base_url,
            keepalive_interval: KEEPALIVE_INTERVAL,
            reconnect: ReconnectPolicy::HostDriven,
        }
    }
}

/// Event endpoint for `client_id`: `<base>/await?client=<client_id>`.
pub fn event_endpoint(base: &Url, client_id: &str) -> Url {
    let mut url = base.clone();
    let path = format!("{}/{PUSH_ENDPOINT_PATH}", base.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.query_pairs_mut().append_pair(PUSH_CLIENT_QUERY_KEY, client_id);
    url
}

struct ConsumerBinding {
    consumer: Arc<dyn PushConsumer>,
    queue: SerialQueue,
}

enum Command {
    SetConsumer(Option<ConsumerBinding>),
    SetKeepOpen(bool),
    AttemptOpen,
    CredentialChanged,
    CloseAndRemoveConsumer,
}

/// Handle to the push connection actor.
///
/// Dropping the last handle closes the connection and stops the actor.
#[derive(Debug, Clone)]
pub struct PushChannel {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PushConnectionState>,
    events: Arc<ObserverRegistry<PushChannelEvent>>,
}

impl PushChannel {
    /// Start the actor on the current tokio runtime.
    pub fn spawn(
        config: PushChannelConfig,
        transport: Arc<dyn PushTransport>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(PushConnectionState::Idle);
        let events = ObserverRegistry::new();

        let actor = actor::PushChannelActor::new(
            config,
            transport,
            credentials,
            Arc::clone(&events),
            state_tx,
        );
        tokio::spawn(actor.run(command_rx));

        Self {
            commands,
            state,
            events,
        }
    }

    /// Register (`Some`) or remove (`None`) the consumer.
    ///
    /// Registering asks the channel to stay open and attempts to connect.
    /// Removing behaves like [`Self::close_and_remove_consumer`].
    pub fn set_consumer(&self, consumer: Option<(Arc<dyn PushConsumer>, SerialQueue)>) {
        let binding = consumer.map(|(consumer, queue)| ConsumerBinding { consumer, queue });
        self.send(Command::SetConsumer(binding));
    }

    /// Set whether the channel should connect when it can. `false` does not
    /// close an open connection.
    pub fn set_keep_open(&self, keep_open: bool) {
        self.send(Command::SetKeepOpen(keep_open));
    }

    /// Connect now if the channel is idle and allowed to connect.
    pub fn attempt_open(&self) {
        self.send(Command::AttemptOpen);
    }

    /// Re-read the credential source. Abandons an attempt in progress.
    pub fn credential_did_change(&self) {
        self.send(Command::CredentialChanged);
    }

    /// Detach the consumer and close the connection.
    ///
    /// The channel stays closed until asked again through
    /// [`Self::attempt_open`], [`Self::set_consumer`] or
    /// [`Self::set_keep_open`]. Credential changes and backoff retries do
    /// not reopen it.
    pub fn close_and_remove_consumer(&self) {
        self.send(Command::CloseAndRemoveConsumer);
    }

    /// Current state.
    pub fn state(&self) -> PushConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<PushConnectionState> {
        self.state.clone()
    }

    /// Wait until the state equals `target`. Returns `false` if the actor
    /// stopped first.
    pub async fn wait_for_state(&self, target: PushConnectionState) -> bool {
        let mut state = self.state.clone();
        let reached = state.wait_for(|current| *current == target).await.is_ok();
        reached
    }

    /// Registry for [`PushChannelEvent`]s.
    pub fn events(&self) -> &Arc<ObserverRegistry<PushChannelEvent>> {
        &self.events
    }

    /// Convenience wrapper around `events().subscribe`.
    pub fn on_event<F>(&self, callback: F) -> Subscription<PushChannelEvent>
    where
        F: Fn(&PushChannelEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("[PushChannel] Actor stopped, dropping command");
        }
    }
}
