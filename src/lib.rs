//! Backend transport - the network core of a messaging client.
//!
//! This crate owns every connection a client makes to its backend:
//! unauthenticated HTTP requests under a hard concurrency cap, one
//! long-lived push connection for server-initiated events, and the TLS
//! trust decision both of them depend on.
//!
//! # Architecture
//!
//! - **Dispatcher** - Admits at most three in-flight requests and signals
//!   when capacity frees up
//! - **Trust** - Chain validation plus public-key pinning, plugged into
//!   rustls as a certificate verifier
//! - **Push** - Actor owning the push connection state machine
//! - **Session** - Wires the three together from a [`Config`]
//!
//! # Modules
//!
//! - [`dispatcher`] - Bounded request dispatch
//! - [`trust`] - Pinned trust evaluation
//! - [`push`] - Push connection manager
//! - [`config`] - Configuration loading/saving
//! - [`secrets`] - Keyring / file secret storage

pub mod config;
pub mod constants;
pub mod credential;
pub mod dispatcher;
pub mod env;
pub mod error;
pub mod logging;
pub mod observers;
pub mod proxy;
pub mod push;
pub mod secrets;
pub mod session;
pub mod trust;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use credential::{AccessToken, Credential, CredentialHolder, CredentialSource};
pub use dispatcher::{EnqueueResult, RequestDispatcher, TransportRequest, TransportResponse};
pub use error::TransportError;
pub use push::{PushChannel, PushConnectionState, PushConsumer, SerialQueue};
pub use session::TransportSession;
pub use trust::TrustValidator;
