//! Server-side registry of live multiplexed connections.
//!
//! Each WebSocket connection registers here and gets a handle carrying
//! its outbound envelope queue. Inbound frames are decoded and routed:
//! chat commands start a bridge generation wired back to the issuing
//! connection, system commands reply with one snapshot, and anything
//! undecodable earns an in-band error envelope while the connection
//! stays open.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use braid_core::events::BridgeEvent;
use braid_core::ports::{SnapshotEmitter, TelemetryProbe};
use braid_core::wire::{decode_command, ClientCommand, Envelope};
use braid_runtime::ChatBridge;

/// One registered connection.
///
/// Holds the outbound queue and the cancellation tokens of generations
/// this connection started. Tokens are cancelled when the connection is
/// unregistered, which kills the associated inference processes.
pub struct ConnectionHandle {
    id: Uuid,
    outbound: mpsc::Sender<Envelope>,
    pending: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl ConnectionHandle {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an envelope for this connection. Returns false when the
    /// connection's egress side is gone.
    pub async fn send(&self, envelope: Envelope) -> bool {
        self.outbound.send(envelope).await.is_ok()
    }

    async fn track(&self, request_id: Uuid, token: CancellationToken) {
        self.pending.lock().await.insert(request_id, token);
    }

    async fn finish(&self, request_id: Uuid) {
        self.pending.lock().await.remove(&request_id);
    }

    async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        for (request_id, token) in pending.drain() {
            debug!(%request_id, "cancelling generation for closed connection");
            token.cancel();
        }
    }
}

/// Set of live connections plus the services inbound frames route to.
pub struct SessionRegistry {
    bridge: Arc<ChatBridge>,
    probe: Arc<dyn TelemetryProbe>,
    connections: RwLock<HashMap<Uuid, Arc<ConnectionHandle>>>,
}

impl SessionRegistry {
    pub fn new(bridge: Arc<ChatBridge>, probe: Arc<dyn TelemetryProbe>) -> Self {
        Self {
            bridge,
            probe,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection whose egress task reads from the receiving
    /// end of `outbound`.
    pub async fn register(&self, outbound: mpsc::Sender<Envelope>) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle {
            id: Uuid::new_v4(),
            outbound,
            pending: Mutex::new(HashMap::new()),
        });
        let mut connections = self.connections.write().await;
        connections.insert(handle.id, Arc::clone(&handle));
        info!(connection_id = %handle.id, total = connections.len(), "connection registered");
        handle
    }

    /// Remove a connection and cancel every generation it started.
    pub async fn unregister(&self, id: Uuid) {
        let removed = self.connections.write().await.remove(&id);
        if let Some(handle) = removed {
            handle.cancel_all().await;
            info!(connection_id = %id, "connection unregistered");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Route one inbound frame from `connection`.
    ///
    /// Never tears the connection down: decode failures and rejected
    /// commands are answered with an in-band error envelope.
    pub async fn dispatch(&self, connection: &Arc<ConnectionHandle>, raw: &str) {
        match decode_command(raw) {
            Ok(ClientCommand::Chat(request)) => {
                self.start_generation(connection, request).await;
            }
            Ok(ClientCommand::System) => match self.probe.sample().await {
                Ok(snapshot) => {
                    connection.send(Envelope::System(snapshot)).await;
                }
                Err(e) => {
                    warn!(connection_id = %connection.id, error = %e, "snapshot failed");
                    connection
                        .send(Envelope::error(format!("telemetry unavailable: {e}")))
                        .await;
                }
            },
            Err(e) => {
                warn!(connection_id = %connection.id, error = %e, "dropping inbound frame");
                connection.send(Envelope::error(e.to_string())).await;
            }
        }
    }

    async fn start_generation(
        &self,
        connection: &Arc<ConnectionHandle>,
        request: braid_core::wire::ChatRequest,
    ) {
        let (tx, mut rx) = mpsc::channel::<BridgeEvent>(64);
        let handle = match self.bridge.start(request, tx).await {
            Ok(handle) => handle,
            Err(e) => {
                connection.send(Envelope::error(e.to_string())).await;
                return;
            }
        };

        let request_id = handle.request_id();
        connection
            .track(request_id, handle.cancellation_token())
            .await;

        let connection = Arc::clone(connection);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let terminal = event.is_terminal();
                if !connection.send(event.into()).await {
                    // Egress gone; the bridge keeps draining on its own.
                    break;
                }
                if terminal {
                    break;
                }
            }
            connection.finish(request_id).await;
        });
    }

    /// Send an envelope to every live connection. Connections that are
    /// mid-teardown are skipped.
    pub async fn broadcast(&self, envelope: Envelope) {
        let targets: Vec<Arc<ConnectionHandle>> = {
            let connections = self.connections.read().await;
            connections.values().map(Arc::clone).collect()
        };
        for connection in targets {
            if !connection.send(envelope.clone()).await {
                debug!(connection_id = %connection.id, "skipping closed connection in broadcast");
            }
        }
    }
}

#[async_trait]
impl SnapshotEmitter for SessionRegistry {
    async fn emit(&self, envelope: Envelope) {
        self.broadcast(envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::error::TelemetryError;
    use braid_core::telemetry::{
        CpuStats, RamStats, ServiceStatus, StorageStats, SystemSnapshot,
    };
    use braid_core::wire::{ChatDelta, EnvelopeKind};
    use braid_runtime::BridgeConfig;
    use std::time::Duration;

    struct UpProbe;

    #[async_trait]
    impl braid_core::ports::ServiceProbe for UpProbe {
        async fn is_running(&self) -> bool {
            true
        }
    }

    struct StubTelemetry;

    #[async_trait]
    impl TelemetryProbe for StubTelemetry {
        async fn sample(&self) -> Result<SystemSnapshot, TelemetryError> {
            Ok(SystemSnapshot {
                ram: RamStats {
                    total: 100,
                    used: 50,
                    usage_pct: 50,
                },
                cpu: CpuStats { temperature_c: 40 },
                storage: StorageStats {
                    total: 10.0,
                    used: 5.0,
                    available: 5.0,
                    usage_pct: 50,
                },
                service_status: ServiceStatus::Running,
            })
        }
    }

    fn registry_with(program: &str, script: &str) -> SessionRegistry {
        let bridge = Arc::new(ChatBridge::new(
            BridgeConfig {
                program: program.into(),
                run_args: vec!["-c".into(), script.into()],
                idle_timeout: Some(Duration::from_secs(5)),
            },
            Arc::new(UpProbe),
        ));
        SessionRegistry::new(bridge, Arc::new(StubTelemetry))
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let registry = registry_with("sh", "cat");
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        registry.register(tx_a).await;
        registry.register(tx_b).await;

        registry.broadcast(Envelope::error("ping")).await;
        assert_eq!(rx_a.recv().await.unwrap().kind(), EnvelopeKind::Error);
        assert_eq!(rx_b.recv().await.unwrap().kind(), EnvelopeKind::Error);
    }

    #[tokio::test]
    async fn unregister_is_safe_during_broadcast_churn() {
        let registry = registry_with("sh", "cat");
        let (tx, _rx) = mpsc::channel(8);
        let handle = registry.register(tx).await;
        assert_eq!(registry.connection_count().await, 1);

        registry.unregister(handle.id()).await;
        assert_eq!(registry.connection_count().await, 0);
        // Broadcasting to an empty registry is a no-op, not an error.
        registry.broadcast(Envelope::error("ping")).await;
        // Double unregister is a no-op.
        registry.unregister(handle.id()).await;
    }

    #[tokio::test]
    async fn undecodable_frame_answers_in_band_and_keeps_connection() {
        let registry = registry_with("sh", "cat");
        let (tx, mut rx) = mpsc::channel(8);
        let conn = registry.register(tx).await;

        registry.dispatch(&conn, r#"{"type":"telepathy"}"#).await;
        assert_eq!(rx.recv().await.unwrap().kind(), EnvelopeKind::Error);
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn system_command_replies_with_snapshot() {
        let registry = registry_with("sh", "cat");
        let (tx, mut rx) = mpsc::channel(8);
        let conn = registry.register(tx).await;

        registry.dispatch(&conn, r#"{"type":"system"}"#).await;
        match rx.recv().await.unwrap() {
            Envelope::System(snapshot) => assert_eq!(snapshot.ram.usage_pct, 50),
            other => panic!("expected system envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_command_streams_deltas_back_to_the_issuer() {
        let registry = registry_with("sh", "cat");
        let (tx, mut rx) = mpsc::channel(32);
        let conn = registry.register(tx).await;

        registry
            .dispatch(
                &conn,
                r#"{"type":"chat","payload":{"model":"m","content":"hello"}}"#,
            )
            .await;

        let mut text = String::new();
        loop {
            match rx.recv().await.unwrap() {
                Envelope::Chat(ChatDelta::Start { .. }) => {}
                Envelope::Chat(ChatDelta::Update { content, .. }) => text.push_str(&content),
                Envelope::Chat(ChatDelta::End { .. }) => break,
                other => panic!("unexpected envelope: {other:?}"),
            }
        }
        assert_eq!(text, "hello\n");
        // Terminal delta released the pending entry.
        assert!(conn.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_chat_command_is_an_in_band_error() {
        let registry = registry_with("sh", "cat");
        let (tx, mut rx) = mpsc::channel(8);
        let conn = registry.register(tx).await;

        registry
            .dispatch(
                &conn,
                r#"{"type":"chat","payload":{"model":"","content":"hi"}}"#,
            )
            .await;
        assert_eq!(rx.recv().await.unwrap().kind(), EnvelopeKind::Error);
    }

    #[tokio::test]
    async fn unregister_cancels_in_flight_generations() {
        let registry = registry_with("sh", "sleep 30");
        let (tx, mut rx) = mpsc::channel(32);
        let conn = registry.register(tx).await;

        registry
            .dispatch(
                &conn,
                r#"{"type":"chat","payload":{"model":"m","content":"hi"}}"#,
            )
            .await;

        // Wait for the start delta so the generation is tracked.
        match rx.recv().await.unwrap() {
            Envelope::Chat(ChatDelta::Start { .. }) => {}
            other => panic!("expected start, got {other:?}"),
        }
        let token = {
            let pending = conn.pending.lock().await;
            pending.values().next().unwrap().clone()
        };

        registry.unregister(conn.id()).await;
        assert!(token.is_cancelled());
    }
}
