//! Push channel actor: owns the connection and every state transition.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::policy::Backoff;
use crate::constants::MIN_KEEPALIVE_INTERVAL;
use super::{
    event_endpoint, Command, ConsumerBinding, PushChannelConfig, PushChannelEvent,
    PushConnectRequest, PushConnectionState, PushConsumer, PushFrame, PushSink, PushStream,
    PushTransport,
};
use crate::credential::CredentialSource;
use crate::error::TransportError;
use crate::logging::endpoint_description;
use crate::observers::ObserverRegistry;

/// Events produced by the connect and receive tasks.
enum ConnectionEvent {
    Connected {
        generation: u64,
        result: Result<(Box<dyn PushSink>, Box<dyn PushStream>), TransportError>,
    },
    Frame {
        generation: u64,
        frame: PushFrame,
    },
    ReceiveFailed {
        generation: u64,
        error: TransportError,
    },
    StreamEnded {
        generation: u64,
    },
}

struct OpenConnection {
    generation: u64,
    sink: Box<dyn PushSink>,
    receiver: JoinHandle<()>,
    keepalive: Interval,
}

enum Phase {
    Idle,
    Connecting { generation: u64, task: JoinHandle<()> },
    Open(OpenConnection),
    Closed,
}

pub(super) struct PushChannelActor {
    config: PushChannelConfig,
    transport: Arc<dyn PushTransport>,
    credentials: Arc<dyn CredentialSource>,
    observers: Arc<ObserverRegistry<PushChannelEvent>>,
    state_tx: watch::Sender<PushConnectionState>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    phase: Phase,
    consumer: Option<ConsumerBinding>,
    keep_open: bool,
    /// Set by `close_and_remove_consumer`; only an explicit open request
    /// clears it. Credential changes and the backoff timer respect it.
    suppressed: bool,
    generation: u64,
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl PushChannelActor {
    pub(super) fn new(
        config: PushChannelConfig,
        transport: Arc<dyn PushTransport>,
        credentials: Arc<dyn CredentialSource>,
        observers: Arc<ObserverRegistry<PushChannelEvent>>,
        state_tx: watch::Sender<PushConnectionState>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let backoff = Backoff::new(config.reconnect);
        Self {
            config,
            transport,
            credentials,
            observers,
            state_tx,
            events_tx,
            events_rx,
            phase: Phase::Idle,
            consumer: None,
            keep_open: false,
            suppressed: false,
            generation: 0,
            backoff,
            retry_at: None,
        }
    }

    /// Main loop. Ends when every [`super::PushChannel`] handle is dropped.
    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        log::debug!("[PushChannel] Actor started");
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_connection_event(event).await;
                }
                () = keepalive_tick(&mut self.phase) => {
                    self.send_keepalive().await;
                }
                () = retry_timer(self.retry_at) => {
                    self.retry_at = None;
                    self.try_open("backoff timer");
                }
            }
        }

        self.consumer = None;
        self.teardown(None, true).await;
        log::debug!("[PushChannel] Actor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetConsumer(Some(binding)) => {
                log::debug!(
                    "[PushChannel] Consumer registered on queue {}",
                    binding.queue.label()
                );
                self.consumer = Some(binding);
                self.keep_open = true;
                self.suppressed = false;
                self.try_open("consumer registered");
            }
            Command::SetConsumer(None) | Command::CloseAndRemoveConsumer => {
                self.close_and_remove_consumer().await;
            }
            Command::SetKeepOpen(keep_open) => {
                self.keep_open = keep_open;
                if keep_open {
                    self.suppressed = false;
                    self.try_open("keep-open set");
                } else {
                    self.retry_at = None;
                }
            }
            Command::AttemptOpen => {
                self.suppressed = false;
                self.try_open("requested");
            }
            Command::CredentialChanged => {
                if self.suppressed {
                    log::debug!("[PushChannel] Credential changed while closed by request");
                    return;
                }
                if matches!(self.phase, Phase::Connecting { .. }) {
                    log::info!("[PushChannel] Credential changed, abandoning connection attempt");
                    self.teardown(None, true).await;
                }
                self.try_open("credential changed");
            }
        }
    }

    async fn close_and_remove_consumer(&mut self) {
        // Detach first so the consumer does not hear about this closure.
        self.consumer = None;
        self.suppressed = true;
        self.retry_at = None;
        self.teardown(None, true).await;
    }

    /// Start a connection attempt if the channel is idle and allowed to
    /// connect.
    fn try_open(&mut self, reason: &str) {
        match self.phase {
            Phase::Connecting { .. } | Phase::Open(_) => {
                log::trace!("[PushChannel] Already connecting or open ({reason})");
                return;
            }
            Phase::Closed => {
                self.phase = Phase::Idle;
                self.set_state(PushConnectionState::Idle);
            }
            Phase::Idle => {}
        }

        if !self.keep_open {
            log::debug!("[PushChannel] Not opening ({reason}): not asked to stay open");
            return;
        }
        if self.suppressed {
            log::debug!("[PushChannel] Not opening ({reason}): closed until asked again");
            return;
        }
        let Some(credential) = self.credentials.current() else {
            log::debug!("[PushChannel] Not opening ({reason}): no credential");
            return;
        };
        let Some(client_id) = credential.client_id.as_deref() else {
            log::debug!("[PushChannel] Not opening ({reason}): credential has no client id");
            return;
        };

        let url = event_endpoint(&self.config.ws_base_url, client_id);
        log::info!(
            "[PushChannel] Connecting to {} ({reason})",
            endpoint_description(&url)
        );
        let request = PushConnectRequest {
            url,
            authorization: credential.access_token.authorization_header(),
        };

        self.retry_at = None;
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let result = transport.connect(request).await;
            let _ = events.send(ConnectionEvent::Connected { generation, result });
        });

        self.phase = Phase::Connecting { generation, task };
        self.set_state(PushConnectionState::Connecting);
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { generation, result } => {
                let current = matches!(
                    self.phase,
                    Phase::Connecting { generation: attempt, .. } if attempt == generation
                );
                if !current {
                    log::debug!("[PushChannel] Discarding stale handshake result #{generation}");
                    if let Ok((mut sink, _stream)) = result {
                        tokio::spawn(async move { sink.close().await });
                    }
                    return;
                }
                match result {
                    Ok((sink, stream)) => self.did_open(generation, sink, stream),
                    Err(error) => self.did_fail_to_open(error),
                }
            }
            ConnectionEvent::Frame { generation, frame } => {
                if !self.is_current(generation) {
                    return;
                }
                match frame {
                    PushFrame::Binary(data) => self.did_receive(&data),
                    PushFrame::Text(_) => log::trace!("[PushChannel] Ignoring text frame"),
                    PushFrame::Close { code, reason } => {
                        log::info!("[PushChannel] Closed by server (code {code}: {reason})");
                        self.teardown(None, false).await;
                        self.schedule_retry();
                    }
                }
            }
            ConnectionEvent::ReceiveFailed { generation, error } => {
                if !self.is_current(generation) {
                    return;
                }
                log::warn!("[PushChannel] {error}");
                self.teardown(Some(error), false).await;
                self.schedule_retry();
            }
            ConnectionEvent::StreamEnded { generation } => {
                if !self.is_current(generation) {
                    return;
                }
                log::info!("[PushChannel] Stream ended");
                self.teardown(None, false).await;
                self.schedule_retry();
            }
        }
    }

    fn did_open(&mut self, generation: u64, sink: Box<dyn PushSink>, stream: Box<dyn PushStream>) {
        let receiver = tokio::spawn(receive_loop(generation, stream, self.events_tx.clone()));
        let period = self.config.keepalive_interval.max(MIN_KEEPALIVE_INTERVAL);
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.phase = Phase::Open(OpenConnection {
            generation,
            sink,
            receiver,
            keepalive,
        });
        self.backoff.reset();
        self.set_state(PushConnectionState::Open);
        log::info!("[PushChannel] Connected");

        self.notify_consumer(|consumer| consumer.did_open());
        self.observers.broadcast(&PushChannelEvent::Opened);
    }

    fn did_fail_to_open(&mut self, error: TransportError) {
        if error.is_trust_rejection() {
            log::error!("[PushChannel] Handshake rejected: {error}");
        } else {
            log::warn!("[PushChannel] {error}");
        }
        self.phase = Phase::Closed;
        self.set_state(PushConnectionState::Closed);
        self.observers
            .broadcast(&PushChannelEvent::Closed { error: Some(error) });
        self.schedule_retry();
    }

    fn did_receive(&self, data: &[u8]) {
        match serde_json::from_slice::<Value>(data) {
            Ok(payload) => {
                log::trace!("[PushChannel] Received {} byte payload", data.len());
                self.notify_consumer(move |consumer| consumer.did_receive(payload));
            }
            Err(e) => {
                let error = TransportError::DecodeFailed(e.to_string());
                log::warn!("[PushChannel] Dropping frame: {error}");
            }
        }
    }

    /// Tear down whatever connection or attempt exists and land in
    /// `Closed`. `local` sends a close frame before dropping the sink.
    async fn teardown(&mut self, error: Option<TransportError>, local: bool) {
        let was_open = match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Open(mut connection) => {
                connection.receiver.abort();
                if local {
                    self.set_state(PushConnectionState::Closing);
                    connection.sink.close().await;
                }
                true
            }
            Phase::Connecting { task, .. } => {
                task.abort();
                false
            }
            idle_or_closed => {
                self.phase = idle_or_closed;
                return;
            }
        };

        self.set_state(PushConnectionState::Closed);
        log::info!("[PushChannel] Disconnected");
        if was_open {
            let reported = error.clone();
            self.notify_consumer(move |consumer| consumer.did_close(reported.as_ref()));
        }
        self.observers.broadcast(&PushChannelEvent::Closed { error });
    }

    fn schedule_retry(&mut self) {
        if !self.keep_open || self.suppressed {
            return;
        }
        let Some(delay) = self.backoff.next_delay() else {
            return;
        };
        match Instant::now().checked_add(delay) {
            Some(deadline) => {
                log::info!("[PushChannel] Reconnecting in {:.1}s", delay.as_secs_f64());
                self.retry_at = Some(deadline);
            }
            None => log::warn!("[PushChannel] Backoff delay {delay:?} out of range, not retrying"),
        }
    }

    async fn send_keepalive(&mut self) {
        if let Phase::Open(connection) = &mut self.phase {
            log::trace!("[PushChannel] Sending ping");
            if let Err(e) = connection.sink.ping().await {
                log::debug!("[PushChannel] Failed to send ping: {e}");
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(&self.phase, Phase::Open(connection) if connection.generation == generation)
    }

    fn notify_consumer<F>(&self, call: F)
    where
        F: FnOnce(&dyn PushConsumer) + Send + 'static,
    {
        let Some(binding) = &self.consumer else {
            return;
        };
        let consumer = Arc::clone(&binding.consumer);
        if !binding.queue.perform(move || call(consumer.as_ref())) {
            log::warn!(
                "[PushChannel] Consumer queue {} is gone",
                binding.queue.label()
            );
        }
    }

    fn set_state(&self, state: PushConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            log::debug!("[PushChannel] {previous} -> {state}");
        }
    }
}

/// Read frames one at a time and forward them to the actor.
async fn receive_loop(
    generation: u64,
    mut stream: Box<dyn PushStream>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    loop {
        let event = match stream.next_frame().await {
            Some(Ok(frame)) => {
                let closing = matches!(frame, PushFrame::Close { .. });
                if events.send(ConnectionEvent::Frame { generation, frame }).is_err() || closing {
                    return;
                }
                continue;
            }
            Some(Err(error)) => ConnectionEvent::ReceiveFailed { generation, error },
            None => ConnectionEvent::StreamEnded { generation },
        };
        let _ = events.send(event);
        return;
    }
}

async fn keepalive_tick(phase: &mut Phase) {
    match phase {
        Phase::Open(connection) => {
            connection.keepalive.tick().await;
        }
        _ => std::future::pending().await,
    }
}

async fn retry_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
