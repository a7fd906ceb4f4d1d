//! The reconnecting WebSocket transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use braid_core::wire::{decode_envelope, encode, Envelope, EnvelopeKind};

/// Lifecycle of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Never connected, or explicitly disconnected.
    Idle,
    Connecting,
    Open,
    /// Socket dropped; an automatic reconnect is pending.
    Closed,
    /// Retry ceiling reached; no further automatic connects.
    GivenUp,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL, e.g. `ws://localhost:3000/api/ws`.
    pub url: String,
    /// Base unit for the reconnect delay.
    pub base_delay: Duration,
    /// Consecutive failed connections tolerated before giving up.
    pub max_attempts: u32,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// Delay before reconnect attempt number `attempt` (1-based).
///
/// Grows linearly, `base * attempt`, not exponentially.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    // Duration::mul is not const; saturating on millis keeps this total.
    Duration::from_millis(base.as_millis() as u64 * attempt as u64)
}

type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

struct Inner {
    config: TransportConfig,
    state: Mutex<TransportState>,
    handlers: Mutex<HashMap<EnvelopeKind, Vec<(u64, Handler)>>>,
    next_handler_id: AtomicU64,
    /// Sender into the live socket's write half; present only while Open.
    outbound: Mutex<Option<mpsc::Sender<Envelope>>>,
    session: Mutex<Option<CancellationToken>>,
}

impl Inner {
    fn set_state(&self, state: TransportState) {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    fn state(&self) -> TransportState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Route one inbound frame to the subscribers of its type.
    ///
    /// Undecodable frames are logged and dropped; they never tear the
    /// connection down.
    fn dispatch_raw(&self, raw: &str) {
        match decode_envelope(raw) {
            Ok(envelope) => self.dispatch(&envelope),
            Err(e) => warn!(error = %e, "dropping undecodable frame"),
        }
    }

    fn dispatch(&self, envelope: &Envelope) {
        let handlers: Vec<Handler> = {
            let map = self
                .handlers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            map.get(&envelope.kind())
                .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler(envelope);
        }
    }

    fn clear_outbound(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }
}

/// One logical connection with automatic reconnection and typed
/// publish/subscribe.
///
/// Cloning is cheap and shares the connection.
#[derive(Clone)]
pub struct ReconnectingTransport {
    inner: Arc<Inner>,
}

impl ReconnectingTransport {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(TransportState::Idle),
                handlers: Mutex::new(HashMap::new()),
                next_handler_id: AtomicU64::new(0),
                outbound: Mutex::new(None),
                session: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        self.inner.state()
    }

    /// Start the connection loop.
    ///
    /// No-op while the loop is already live (`Connecting`, `Open`, or
    /// `Closed` awaiting its automatic retry). From `GivenUp` this
    /// restarts with a fresh attempt budget.
    pub fn connect(&self) {
        match self.inner.state() {
            TransportState::Connecting | TransportState::Open | TransportState::Closed => return,
            TransportState::Idle | TransportState::GivenUp => {}
        }

        let token = CancellationToken::new();
        {
            let mut session = self
                .inner
                .session
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(old) = session.replace(token.clone()) {
                old.cancel();
            }
        }
        self.inner.set_state(TransportState::Connecting);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_loop(inner, token));
    }

    /// Tear the connection down and stop reconnecting.
    pub fn disconnect(&self) {
        if let Some(token) = self
            .inner
            .session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
        self.inner.clear_outbound();
        self.inner.set_state(TransportState::Idle);
    }

    /// Send an envelope over the live socket.
    ///
    /// When the transport is not `Open` the message is dropped and a
    /// connect is triggered as a side effect; callers needing guaranteed
    /// delivery retry at the application layer.
    pub fn send(&self, envelope: Envelope) {
        let sender = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        match sender {
            Some(tx) => {
                if let Err(e) = tx.try_send(envelope) {
                    warn!(error = %e, "outbound queue rejected envelope, dropping");
                }
            }
            None => {
                debug!("transport not open, dropping envelope and connecting");
                self.connect();
            }
        }
    }

    /// Register a handler for one envelope type. Multiple handlers per
    /// type are allowed and each receives every matching envelope.
    pub fn subscribe<F>(&self, kind: EnvelopeKind, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            inner: Arc::clone(&self.inner),
            kind,
            id,
            active: AtomicBool::new(true),
        }
    }
}

/// Handle for one registered subscriber.
pub struct Subscription {
    inner: Arc<Inner>,
    kind: EnvelopeKind,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Remove exactly this handler. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut handlers = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entries) = handlers.get_mut(&self.kind) {
            entries.retain(|(id, _)| *id != self.id);
        }
    }
}

async fn run_loop(inner: Arc<Inner>, token: CancellationToken) {
    // Consecutive failed/closed connections since the last Open.
    let mut failures: u32 = 0;

    loop {
        if token.is_cancelled() {
            return;
        }

        inner.set_state(TransportState::Connecting);
        match connect_async(inner.config.url.as_str()).await {
            Ok((socket, _)) => {
                info!(url = %inner.config.url, "transport connected");
                failures = 0;
                inner.set_state(TransportState::Open);
                run_session(&inner, &token, socket).await;
                inner.clear_outbound();
                if token.is_cancelled() {
                    return;
                }
                inner.set_state(TransportState::Closed);
            }
            Err(e) => {
                warn!(url = %inner.config.url, error = %e, "connect failed");
                inner.set_state(TransportState::Closed);
            }
        }

        failures += 1;
        if failures >= inner.config.max_attempts {
            warn!(failures, "retry ceiling reached, giving up");
            inner.set_state(TransportState::GivenUp);
            inner.dispatch(&Envelope::error(format!(
                "connection lost; gave up after {failures} attempts"
            )));
            return;
        }

        let delay = reconnect_delay(inner.config.base_delay, failures);
        debug!(attempt = failures + 1, ?delay, "reconnecting after delay");
        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Drive one live socket until it drops or the session is cancelled.
async fn run_session(inner: &Arc<Inner>, token: &CancellationToken, socket: WsStream) {
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Envelope>(64);
    *inner
        .outbound
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(tx);

    loop {
        tokio::select! {
            () = token.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            maybe = rx.recv() => {
                let Some(envelope) = maybe else { return };
                let frame = match encode(&envelope) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "failed to encode envelope, dropping");
                        continue;
                    }
                };
                if write.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => inner.dispatch_raw(&text),
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "socket read failed");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn delay_grows_linearly_with_attempts() {
        let base = Duration::from_millis(1000);
        assert_eq!(reconnect_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(reconnect_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(reconnect_delay(base, 5), Duration::from_millis(5000));
    }

    /// A one-connection server that forwards envelopes handed to it.
    async fn spawn_server() -> (String, mpsc::Sender<Envelope>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel::<Envelope>(16);

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(envelope) = rx.recv().await {
                let frame = encode(&envelope).unwrap();
                if ws.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        });

        (format!("ws://{addr}"), tx)
    }

    async fn wait_for_open(transport: &ReconnectingTransport) {
        for _ in 0..100 {
            if transport.state() == TransportState::Open {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transport never opened");
    }

    #[tokio::test]
    async fn delivers_envelopes_to_matching_subscribers_only() {
        let (url, server_tx) = spawn_server().await;
        let transport = ReconnectingTransport::new(TransportConfig::new(url));

        let (chat_tx, mut chat_rx) = mpsc::unbounded_channel();
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();
        transport.subscribe(EnvelopeKind::Error, move |envelope| {
            let _ = error_tx.send(envelope.clone());
        });
        transport.subscribe(EnvelopeKind::Chat, move |envelope| {
            let _ = chat_tx.send(envelope.clone());
        });

        transport.connect();
        wait_for_open(&transport).await;

        server_tx.send(Envelope::error("boom")).await.unwrap();
        let received = error_rx.recv().await.unwrap();
        assert_eq!(received.kind(), EnvelopeKind::Error);
        assert!(chat_rx.try_recv().is_err());

        transport.disconnect();
        assert_eq!(transport.state(), TransportState::Idle);
    }

    #[tokio::test]
    async fn unsubscribe_removes_exactly_one_handler() {
        let (url, server_tx) = spawn_server().await;
        let transport = ReconnectingTransport::new(TransportConfig::new(url));

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let sub_a = transport.subscribe(EnvelopeKind::Error, move |e| {
            let _ = tx_a.send(e.clone());
        });
        transport.subscribe(EnvelopeKind::Error, move |e| {
            let _ = tx_b.send(e.clone());
        });

        transport.connect();
        wait_for_open(&transport).await;

        server_tx.send(Envelope::error("one")).await.unwrap();
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());

        sub_a.unsubscribe();
        sub_a.unsubscribe(); // idempotent

        server_tx.send(Envelope::error("two")).await.unwrap();
        assert!(rx_b.recv().await.is_some());
        assert!(rx_a.try_recv().is_err());

        transport.disconnect();
    }

    #[tokio::test]
    async fn gives_up_after_the_retry_ceiling_and_notifies() {
        // Bind then drop to get a port with no listener.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport = ReconnectingTransport::new(TransportConfig {
            url: format!("ws://127.0.0.1:{port}"),
            base_delay: Duration::from_millis(5),
            max_attempts: 3,
        });

        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        transport.subscribe(EnvelopeKind::Error, move |e| {
            let _ = fatal_tx.send(e.clone());
        });

        transport.connect();
        // Redundant connect while the loop is live is a no-op.
        transport.connect();

        let fatal = fatal_rx.recv().await.unwrap();
        assert_eq!(fatal.kind(), EnvelopeKind::Error);
        assert_eq!(transport.state(), TransportState::GivenUp);
    }

    #[tokio::test]
    async fn send_while_idle_drops_and_triggers_connect() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = ReconnectingTransport::new(TransportConfig {
            url: format!("ws://127.0.0.1:{port}"),
            base_delay: Duration::from_millis(5),
            max_attempts: 2,
        });

        assert_eq!(transport.state(), TransportState::Idle);
        transport.send(Envelope::error("dropped"));
        // The side effect is a connection attempt, not delivery.
        assert_ne!(transport.state(), TransportState::Idle);
    }
}
