//! Connection registry.
//!
//! Maps every live connection id to its outbound channel and to what the
//! connection registered as. Control signals produced by a source's
//! [`SessionManager`](crate::session::SessionManager) are routed here.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use screenlock_rpc::helpers::raw_event;
use screenlock_rpc::protocol::{
    ExternalMessageParams, Message, NamespaceKind, SourceStatus, events,
};
use screenlock_types::{ConnectionId, StatRecord};

use crate::client::{ClientManager, IdleTimer};
use crate::error::{DaemonError, Result};
use crate::session::{ControlSignal, Recipient, SignalKind};
use crate::source::SourceManager;

/// Target used for per-transition statistics records.
pub const STATS_TARGET: &str = "screenlock::stats";

#[derive(Debug)]
pub enum ConnectionRole {
    /// Accepted but not registered in a namespace yet
    Pending,
    Source(SourceManager),
    Client(ClientManager),
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub namespace: Option<String>,
    pub sender: mpsc::UnboundedSender<Message>,
    pub role: ConnectionRole,
    idle_tx: mpsc::UnboundedSender<u64>,
}

impl Connection {
    #[must_use]
    pub fn is_registered(&self) -> bool {
        !matches!(self.role, ConnectionRole::Pending)
    }

    /// What the connection registered as, `None` while pending.
    #[must_use]
    pub fn kind(&self) -> Option<NamespaceKind> {
        match self.role {
            ConnectionRole::Pending => None,
            ConnectionRole::Source(_) => Some(NamespaceKind::Source),
            ConnectionRole::Client(_) => Some(NamespaceKind::Client),
        }
    }

    fn send(&self, msg: Message) -> bool {
        if let Err(e) = self.sender.send(msg) {
            warn!("Failed to send to {}: {}", self.id, e);
            return false;
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection.
    ///
    /// `idle_tx` receives the generation of each idle-timer firing once the
    /// connection registers as a client.
    pub fn insert_pending(
        &mut self,
        id: ConnectionId,
        sender: mpsc::UnboundedSender<Message>,
        idle_tx: mpsc::UnboundedSender<u64>,
    ) {
        debug!("New connection: {id}");
        self.connections.insert(
            id.clone(),
            Connection {
                id,
                namespace: None,
                sender,
                role: ConnectionRole::Pending,
                idle_tx,
            },
        );
    }

    /// Give a pending connection its namespace role.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` for an unknown connection and
    /// `AlreadyRegistered` if it registered before.
    pub fn register(
        &mut self,
        id: &ConnectionId,
        namespace: &str,
        kind: NamespaceKind,
        params: Map<String, Value>,
        default_timeout: Duration,
    ) -> Result<()> {
        let conn = self
            .connections
            .get_mut(id)
            .ok_or(DaemonError::NotRegistered)?;
        if conn.is_registered() {
            return Err(DaemonError::AlreadyRegistered);
        }

        conn.role = match kind {
            NamespaceKind::Source => ConnectionRole::Source(SourceManager::new(id.clone(), params)),
            NamespaceKind::Client => ConnectionRole::Client(ClientManager::new(
                IdleTimer::new(conn.idle_tx.clone()),
                default_timeout,
            )),
        };
        conn.namespace = Some(namespace.to_string());
        info!("Connection {id} registered in '{namespace}' as {kind}");
        Ok(())
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        self.connections.remove(id)
    }

    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    #[must_use]
    pub fn source(&self, id: &ConnectionId) -> Option<&SourceManager> {
        match &self.connections.get(id)?.role {
            ConnectionRole::Source(source) => Some(source),
            _ => None,
        }
    }

    pub fn source_mut(&mut self, id: &ConnectionId) -> Option<&mut SourceManager> {
        match &mut self.connections.get_mut(id)?.role {
            ConnectionRole::Source(source) => Some(source),
            _ => None,
        }
    }

    #[must_use]
    pub fn client(&self, id: &ConnectionId) -> Option<&ClientManager> {
        match &self.connections.get(id)?.role {
            ConnectionRole::Client(client) => Some(client),
            _ => None,
        }
    }

    pub fn client_mut(&mut self, id: &ConnectionId) -> Option<&mut ClientManager> {
        match &mut self.connections.get_mut(id)?.role {
            ConnectionRole::Client(client) => Some(client),
            _ => None,
        }
    }

    #[must_use]
    pub fn sender(&self, id: &ConnectionId) -> Option<&mpsc::UnboundedSender<Message>> {
        self.connections.get(id).map(|c| &c.sender)
    }

    /// Queue `msg` on a connection's outbound channel.
    pub fn send_to(&self, id: &ConnectionId, msg: Message) -> bool {
        match self.connections.get(id) {
            Some(conn) => conn.send(msg),
            None => {
                debug!("Dropping message for vanished connection {id}");
                false
            }
        }
    }

    /// Push lock/unlock signals to their recipients.
    ///
    /// Requesters get an enveloped push and are unbound by an unlock of their
    /// current session; owners get the raw session.
    pub fn deliver(&mut self, signals: Vec<ControlSignal>) {
        for signal in signals {
            let push = match &signal.recipient {
                Recipient::Requester(id) => {
                    record_transition(&signal, id);
                    if signal.kind == SignalKind::Unlock
                        && let Some(client) = self.client_mut(id)
                    {
                        client.unbind_session(signal.session.id());
                    }
                    ClientManager::control_push(signal.kind, &signal.session)
                }
                Recipient::Owner(_) => match signal.kind {
                    SignalKind::Lock => SourceManager::lock_control(&signal.session),
                    SignalKind::Unlock => SourceManager::unlock_control(&signal.session),
                },
            };

            let (Recipient::Requester(id) | Recipient::Owner(id)) = &signal.recipient;
            match push {
                Ok(msg) => {
                    self.send_to(id, msg);
                }
                Err(e) => warn!("Failed to encode {} for {id}: {e}", signal.kind.event_name()),
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// One entry per registered source, ordered by connection id.
    #[must_use]
    pub fn summary(&self) -> Vec<SourceStatus> {
        let mut sources: Vec<SourceStatus> = self
            .connections
            .values()
            .filter_map(|conn| match &conn.role {
                ConnectionRole::Source(source) => Some(SourceStatus {
                    connection_id: conn.id.clone(),
                    namespace: conn.namespace.clone().unwrap_or_default(),
                    active: source.session_manager().active().cloned(),
                    pending: source.session_manager().pending_len(),
                }),
                _ => None,
            })
            .collect();
        sources.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        sources
    }

    /// Send an `ExternalMessage` to every registered connection.
    ///
    /// Returns whether at least one connection received it.
    pub fn broadcast_external_message(&self, from: &str, message: Value) -> bool {
        let params = ExternalMessageParams {
            from: from.to_string(),
            message,
        };
        let msg = match raw_event(events::EXTERNAL_MESSAGE, &params) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to encode external message from {from}: {e}");
                return false;
            }
        };

        let mut delivered = false;
        for conn in self.connections.values().filter(|c| c.is_registered()) {
            delivered |= conn.send(msg.clone());
        }
        debug!("External message from {from} delivered={delivered}");
        delivered
    }
}

fn record_transition(signal: &ControlSignal, requester: &ConnectionId) {
    let record = transition_record(signal, requester);
    info!(target: STATS_TARGET, record = %record.to_json(), "control transition");
}

fn transition_record(signal: &ControlSignal, requester: &ConnectionId) -> StatRecord {
    let action = match signal.kind {
        SignalKind::Lock => "lock",
        SignalKind::Unlock => "unlock",
    };
    StatRecord::new("control")
        .with_hash_id(requester.as_str())
        .with_field("action", action)
        .with_field("sessionId", signal.session.id().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use screenlock_types::SessionStatus;
    use serde_json::json;

    struct Peer {
        id: ConnectionId,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl Peer {
        fn events(&mut self) -> Vec<(String, Value)> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                if let Message::Notification(n) = msg {
                    out.push((n.method, n.params.unwrap_or(Value::Null)));
                }
            }
            out
        }
    }

    fn connect(registry: &mut ConnectionRegistry, name: &str) -> Peer {
        let id: ConnectionId = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let (idle_tx, _idle_rx) = mpsc::unbounded_channel();
        registry.insert_pending(id.clone(), tx, idle_tx);
        Peer { id, rx }
    }

    fn register(registry: &mut ConnectionRegistry, peer: &Peer, kind: NamespaceKind) {
        let namespace = match kind {
            NamespaceKind::Source => "screen",
            NamespaceKind::Client => "remote",
        };
        registry
            .register(&peer.id, namespace, kind, Map::new(), Duration::from_secs(30))
            .unwrap();
    }

    #[test]
    fn test_register_assigns_role() {
        let mut registry = ConnectionRegistry::new();
        let screen = connect(&mut registry, "screen-1");
        let remote = connect(&mut registry, "remote-1");

        assert!(!registry.get(&screen.id).unwrap().is_registered());
        register(&mut registry, &screen, NamespaceKind::Source);
        register(&mut registry, &remote, NamespaceKind::Client);

        assert!(registry.source(&screen.id).is_some());
        assert!(registry.client(&screen.id).is_none());
        assert!(registry.client(&remote.id).is_some());
        assert_eq!(
            registry.get(&screen.id).unwrap().namespace.as_deref(),
            Some("screen")
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_twice_rejected() {
        let mut registry = ConnectionRegistry::new();
        let screen = connect(&mut registry, "screen-1");
        register(&mut registry, &screen, NamespaceKind::Source);

        let err = registry
            .register(
                &screen.id,
                "screen",
                NamespaceKind::Source,
                Map::new(),
                Duration::from_secs(30),
            )
            .unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRegistered));
    }

    #[test]
    fn test_register_unknown_connection() {
        let mut registry = ConnectionRegistry::new();
        let err = registry
            .register(
                &"ghost".into(),
                "screen",
                NamespaceKind::Source,
                Map::new(),
                Duration::from_secs(30),
            )
            .unwrap_err();
        assert!(matches!(err, DaemonError::NotRegistered));
    }

    #[tokio::test]
    async fn test_deliver_routes_lock_and_unlock() {
        let mut registry = ConnectionRegistry::new();
        let mut screen = connect(&mut registry, "screen-1");
        let mut remote = connect(&mut registry, "remote-1");
        register(&mut registry, &screen, NamespaceKind::Source);
        register(&mut registry, &remote, NamespaceKind::Client);

        let (session, signals) = registry
            .source_mut(&screen.id)
            .unwrap()
            .new_session(remote.id.clone());
        registry.client_mut(&remote.id).unwrap().bind(
            crate::client::Binding {
                source: screen.id.clone(),
                session: session.id().clone(),
            },
            Duration::from_secs(30),
        );
        registry.deliver(signals);

        let client_events = remote.events();
        assert_eq!(client_events.len(), 1);
        assert_eq!(client_events[0].0, events::LOCKED_CONTROL);
        assert_eq!(client_events[0].1["success"], true);
        assert_eq!(client_events[0].1["response"]["status"], "ACTIVE");

        let source_events = screen.events();
        assert_eq!(source_events.len(), 1);
        assert_eq!(source_events[0].0, events::LOCKED_CONTROL);
        assert_eq!(source_events[0].1["id"], session.id().as_str());

        let signals = registry.source_mut(&screen.id).unwrap().finish_active_session();
        registry.deliver(signals);

        let client_events = remote.events();
        assert_eq!(client_events[0].0, events::UNLOCKED_CONTROL);
        assert_eq!(
            client_events[0].1["response"]["status"],
            SessionStatus::Finished.to_string()
        );
        assert!(!registry.client(&remote.id).unwrap().is_bound());
        assert_eq!(screen.events()[0].0, events::UNLOCKED_CONTROL);
    }

    #[test]
    fn test_transition_record_fields() {
        let mut manager = crate::session::SessionManager::new("screen-1".into());
        let (session, signals) = manager.new_session("remote-1".into());
        let lock = &signals[0];
        assert_eq!(lock.recipient, Recipient::Requester("remote-1".into()));

        let record = transition_record(lock, &"remote-1".into()).to_json();
        assert_eq!(record["collection"], "control");
        assert_eq!(record["hashId"], "remote-1");
        assert_eq!(record["action"], "lock");
        assert_eq!(record["sessionId"], session.id().as_str());
        assert!(record.get("ip").is_none());
    }

    #[test]
    fn test_summary_lists_sources() {
        let mut registry = ConnectionRegistry::new();
        let screen = connect(&mut registry, "screen-1");
        let remote = connect(&mut registry, "remote-1");
        register(&mut registry, &screen, NamespaceKind::Source);
        register(&mut registry, &remote, NamespaceKind::Client);

        registry
            .source_mut(&screen.id)
            .unwrap()
            .new_session(remote.id.clone());
        registry
            .source_mut(&screen.id)
            .unwrap()
            .new_session("remote-2".into());

        let summary = registry.summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].connection_id, screen.id);
        assert_eq!(summary[0].namespace, "screen");
        assert!(summary[0].active.is_some());
        assert_eq!(summary[0].pending, 1);
    }

    #[test]
    fn test_broadcast_skips_pending_connections() {
        let mut registry = ConnectionRegistry::new();
        let mut screen = connect(&mut registry, "screen-1");
        let mut pending = connect(&mut registry, "pending-1");
        register(&mut registry, &screen, NamespaceKind::Source);

        assert!(registry.broadcast_external_message("ops", json!({"text": "hi"})));

        let received = screen.events();
        assert_eq!(received[0].0, events::EXTERNAL_MESSAGE);
        assert_eq!(received[0].1, json!({"from": "ops", "message": {"text": "hi"}}));
        assert!(pending.events().is_empty());
    }

    #[test]
    fn test_broadcast_with_nobody_registered() {
        let mut registry = ConnectionRegistry::new();
        let _pending = connect(&mut registry, "pending-1");
        assert!(!registry.broadcast_external_message("ops", json!("hi")));
    }

    #[test]
    fn test_send_to_closed_channel_reports_failure() {
        let mut registry = ConnectionRegistry::new();
        let peer = connect(&mut registry, "gone");
        let id = peer.id.clone();
        drop(peer);

        let msg = raw_event(events::EXTERNAL_MESSAGE, &json!({})).unwrap();
        assert!(!registry.send_to(&id, msg.clone()));
        assert!(!registry.send_to(&"unknown".into(), msg));
    }
}
