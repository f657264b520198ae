// Live channel client - One shared, self-healing push connection
//
// State machine:
//   Disconnected -> Connecting -> Connected -> RetryPending -> Connecting -> ...
//   RetryPending -> Exhausted once the reconnect budget is spent.
//
// Every transport gets a generation number. Callbacks from a transport whose
// generation is no longer current (torn down, or replaced by the heartbeat
// reopen) are ignored, so a deliberate close never schedules a reconnect.
use crate::application::channel_connector::{ChannelConnector, ChannelTransport, TransportEvent};
use crate::application::channel_messages::{InboundMessage, OutboundMessage, now_millis};
use crate::application::event_hub::{EventHub, ListenerId};
use crate::domain::live_update::LiveUpdate;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub endpoint: String,
    /// Must be non-zero
    pub heartbeat_interval: Duration,
    pub liveness_threshold: Duration,
    pub max_missed_pongs: u32,
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay: Duration,
}

impl ChannelSettings {
    #[cfg(test)]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            heartbeat_interval: Duration::from_secs(30),
            liveness_threshold: Duration::from_secs(90),
            max_missed_pongs: 3,
            max_reconnect_attempts: 5,
            base_reconnect_delay: Duration::from_secs(1),
        }
    }

    /// Delay before a retry when `attempt` retries have already been scheduled
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.base_reconnect_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChannelError {
    #[error("live channel transport error: {0}")]
    Transport(String),
    #[error("malformed live channel message: {0}")]
    MalformedMessage(String),
    #[error("live channel is not connected")]
    NotConnected,
    #[error("failed to encode live channel message: {0}")]
    Serialization(String),
    #[error("live channel gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl ChannelError {
    /// Only an explicit `connect()` recovers from a terminal error
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelError::ReconnectExhausted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
    RetryPending,
    Exhausted,
}

struct ChannelEvents {
    live_update: EventHub<LiveUpdate>,
    connected: EventHub<()>,
    disconnected: EventHub<()>,
    error: EventHub<ChannelError>,
}

impl Default for ChannelEvents {
    fn default() -> Self {
        Self {
            live_update: EventHub::new("live_update"),
            connected: EventHub::new("connected"),
            disconnected: EventHub::new("disconnected"),
            error: EventHub::new("error"),
        }
    }
}

struct ConnectionState {
    status: ChannelStatus,
    socket: Option<mpsc::UnboundedSender<String>>,
    generation: u64,
    reconnect_attempts: u32,
    last_pong: Instant,
    missed_pongs: u32,
    subscribers: usize,
    heartbeat: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    transports_opened: u64,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            status: ChannelStatus::Disconnected,
            socket: None,
            generation: 0,
            reconnect_attempts: 0,
            last_pong: Instant::now(),
            missed_pongs: 0,
            subscribers: 0,
            heartbeat: None,
            reconnect_timer: None,
            transports_opened: 0,
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }
}

enum CloseOutcome {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

enum SendOutcome {
    Sent,
    NotConnected,
    TransportGone,
}

struct ChannelInner {
    settings: ChannelSettings,
    connector: Arc<dyn ChannelConnector>,
    state: Mutex<ConnectionState>,
    events: ChannelEvents,
}

/// Cheap to clone; all clones share one connection.
///
/// `connect`, `disconnect` and `send_message` spawn tasks and must be called
/// from within a tokio runtime.
#[derive(Clone)]
pub struct LiveChannelClient {
    inner: Arc<ChannelInner>,
}

impl LiveChannelClient {
    pub fn new(settings: ChannelSettings, connector: Arc<dyn ChannelConnector>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                settings,
                connector,
                state: Mutex::new(ConnectionState::new()),
                events: ChannelEvents::default(),
            }),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.lock().status
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    /// Number of transports this client has started opening
    pub fn transports_opened(&self) -> u64 {
        self.lock().transports_opened
    }

    /// Register interest in the channel, opening it if nothing is open or in progress
    pub fn connect(&self) {
        let mut state = self.lock();
        state.subscribers += 1;
        match state.status {
            ChannelStatus::Connected | ChannelStatus::Connecting | ChannelStatus::RetryPending => {
                tracing::debug!(subscribers = state.subscribers, "Live channel already active");
            }
            ChannelStatus::Exhausted => {
                tracing::info!("Restarting live channel after exhausted reconnects");
                state.reconnect_attempts = 0;
                self.begin_open(&mut state);
            }
            ChannelStatus::Disconnected => self.begin_open(&mut state),
        }
    }

    /// Drop one registration; the transport closes when the last one goes
    pub fn disconnect(&self) {
        let was_connected = {
            let mut state = self.lock();
            if state.subscribers == 0 {
                tracing::debug!("disconnect() without subscribers, ignoring");
                return;
            }
            state.subscribers -= 1;
            if state.subscribers > 0 {
                tracing::debug!(subscribers = state.subscribers, "Live channel still in use");
                return;
            }

            state.generation += 1;
            state.socket = None;
            state.stop_heartbeat();
            state.cancel_reconnect();
            state.reconnect_attempts = 0;
            state.missed_pongs = 0;
            let was_connected = state.status == ChannelStatus::Connected;
            state.status = ChannelStatus::Disconnected;
            was_connected
        };

        tracing::info!("Live channel closed");
        if was_connected {
            self.inner.events.disconnected.emit(&());
        }
    }

    /// Fire-and-forget send. Without an open transport the message is dropped
    /// and an error event is emitted.
    pub fn send_message(&self, message: &OutboundMessage) {
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(e) => {
                self.emit_error(ChannelError::Serialization(e.to_string()));
                return;
            }
        };

        let outcome = match self.lock().socket.as_ref() {
            None => SendOutcome::NotConnected,
            Some(socket) => match socket.send(frame) {
                Ok(()) => SendOutcome::Sent,
                Err(_) => SendOutcome::TransportGone,
            },
        };

        match outcome {
            SendOutcome::Sent => {}
            SendOutcome::NotConnected => {
                tracing::warn!("Dropping outbound message, live channel not connected");
                self.emit_error(ChannelError::NotConnected);
            }
            SendOutcome::TransportGone => {
                tracing::warn!("Dropping outbound message, transport already closed");
                self.emit_error(ChannelError::Transport("transport closed".to_string()));
            }
        }
    }

    pub fn on_live_update<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&LiveUpdate) + Send + Sync + 'static,
    {
        self.inner.events.live_update.on(callback)
    }

    pub fn off_live_update(&self, id: ListenerId) -> bool {
        self.inner.events.live_update.off(id)
    }

    pub fn on_connected<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.inner.events.connected.on(callback)
    }

    pub fn off_connected(&self, id: ListenerId) -> bool {
        self.inner.events.connected.off(id)
    }

    pub fn on_disconnected<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.inner.events.disconnected.on(callback)
    }

    pub fn off_disconnected(&self, id: ListenerId) -> bool {
        self.inner.events.disconnected.off(id)
    }

    pub fn on_error<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ChannelError) + Send + Sync + 'static,
    {
        self.inner.events.error.on(callback)
    }

    pub fn off_error(&self, id: ListenerId) -> bool {
        self.inner.events.error.off(id)
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_error(&self, error: ChannelError) {
        self.inner.events.error.emit(&error);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn begin_open(&self, state: &mut ConnectionState) {
        state.generation += 1;
        state.status = ChannelStatus::Connecting;
        state.transports_opened += 1;

        let generation = state.generation;
        let client = self.clone();
        tokio::spawn(async move { client.run_transport(generation).await });
    }

    async fn run_transport(self, generation: u64) {
        let endpoint = &self.inner.settings.endpoint;
        tracing::debug!(generation, "Opening live channel to {}", endpoint);

        let ChannelTransport { outbound, mut inbound } = match self.inner.connector.open(endpoint).await {
            Ok(transport) => transport,
            Err(e) => {
                if self.is_current(generation) {
                    tracing::warn!("Failed to open live channel: {:#}", e);
                    self.emit_error(ChannelError::Transport(format!("{:#}", e)));
                    self.handle_close(generation);
                }
                return;
            }
        };

        if !self.handle_open(generation, outbound) {
            return;
        }

        while let Some(event) = inbound.recv().await {
            if !self.is_current(generation) {
                return;
            }
            match event {
                TransportEvent::Message(text) => self.handle_message(&text),
                TransportEvent::Error(reason) => {
                    tracing::warn!("Live channel transport error: {}", reason);
                    self.emit_error(ChannelError::Transport(reason));
                }
                TransportEvent::Closed => break,
            }
        }

        self.handle_close(generation);
    }

    fn handle_open(&self, generation: u64, outbound: mpsc::UnboundedSender<String>) -> bool {
        {
            let mut state = self.lock();
            if state.generation != generation {
                tracing::debug!(generation, "Discarding transport opened after teardown");
                return false;
            }
            state.socket = Some(outbound);
            state.status = ChannelStatus::Connected;
            state.reconnect_attempts = 0;
            state.missed_pongs = 0;
            state.last_pong = Instant::now();
            state.cancel_reconnect();
            self.start_heartbeat(&mut state, generation);
        }

        tracing::info!("Live channel connected to {}", self.inner.settings.endpoint);
        self.inner.events.connected.emit(&());
        true
    }

    fn handle_close(&self, generation: u64) {
        let outcome = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.socket = None;
            state.stop_heartbeat();

            if state.reconnect_attempts < self.inner.settings.max_reconnect_attempts {
                let delay = self.inner.settings.reconnect_delay(state.reconnect_attempts);
                state.reconnect_attempts += 1;
                state.status = ChannelStatus::RetryPending;
                self.schedule_reconnect(&mut state, generation, delay);
                CloseOutcome::Retry {
                    attempt: state.reconnect_attempts,
                    delay,
                }
            } else {
                state.status = ChannelStatus::Exhausted;
                CloseOutcome::Exhausted {
                    attempts: state.reconnect_attempts,
                }
            }
        };

        match outcome {
            CloseOutcome::Retry { attempt, delay } => {
                tracing::warn!(attempt, "Live channel closed, reconnecting in {:?}", delay);
                self.inner.events.disconnected.emit(&());
            }
            CloseOutcome::Exhausted { attempts } => {
                tracing::error!(attempts, "Live channel closed, reconnect attempts exhausted");
                self.inner.events.disconnected.emit(&());
                self.emit_error(ChannelError::ReconnectExhausted { attempts });
            }
        }
    }

    fn schedule_reconnect(&self, state: &mut ConnectionState, generation: u64, delay: Duration) {
        state.cancel_reconnect();
        let client = self.clone();
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.fire_reconnect(generation);
        }));
    }

    fn fire_reconnect(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation || state.status != ChannelStatus::RetryPending {
            return;
        }
        // this task's own handle
        state.reconnect_timer = None;
        self.begin_open(&mut state);
    }

    fn start_heartbeat(&self, state: &mut ConnectionState, generation: u64) {
        state.stop_heartbeat();
        let client = self.clone();
        let period = self.inner.settings.heartbeat_interval;
        state.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if !client.heartbeat_tick(generation) {
                    break;
                }
            }
        }));
    }

    /// Returns false once this heartbeat should stop
    fn heartbeat_tick(&self, generation: u64) -> bool {
        {
            let state = self.lock();
            if state.generation != generation || state.status != ChannelStatus::Connected {
                return false;
            }
        }
        self.send_message(&OutboundMessage::ping());

        let threshold = self.inner.settings.liveness_threshold;
        {
            let mut state = self.lock();
            if state.generation != generation || state.status != ChannelStatus::Connected {
                return false;
            }
            if state.last_pong.elapsed() <= threshold {
                return true;
            }

            state.missed_pongs += 1;
            tracing::warn!(missed = state.missed_pongs, "No pong within {:?}", threshold);
            if state.missed_pongs < self.inner.settings.max_missed_pongs {
                return true;
            }

            // Replace the silent transport; the reconnect budget and
            // subscriber count are left alone.
            state.socket = None;
            state.missed_pongs = 0;
            state.heartbeat = None;
            self.begin_open(&mut state);
        }

        tracing::warn!("Live channel unresponsive, reopening transport");
        self.inner.events.disconnected.emit(&());
        false
    }

    fn handle_message(&self, text: &str) {
        let message = match serde_json::from_str::<InboundMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed live channel message: {}", e);
                self.emit_error(ChannelError::MalformedMessage(e.to_string()));
                return;
            }
        };

        match message {
            InboundMessage::Ping { timestamp } => {
                self.send_message(&OutboundMessage::Pong {
                    timestamp: timestamp.unwrap_or_else(now_millis),
                });
            }
            InboundMessage::Pong { .. } => {
                let mut state = self.lock();
                state.last_pong = Instant::now();
                state.missed_pongs = 0;
            }
            InboundMessage::LiveUpdate { data } => match LiveUpdate::from_payload(data) {
                Ok(update) => {
                    tracing::debug!(template_id = update.template_id, "Live update received");
                    self.inner.events.live_update.emit(&update);
                }
                Err(reason) => tracing::warn!("Dropping invalid live update: {}", reason),
            },
            InboundMessage::Unknown => {
                tracing::trace!("Ignoring unrecognised live channel message");
            }
        }
    }
}
