//! Session registry: live charge point websocket connections

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::connection::Connection;

/// Thread-safe registry of live OCPP sessions keyed by charge point id
pub struct SessionRegistry {
    sessions: DashMap<String, Connection>,
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    /// Register a connection. A previous session under the same id is
    /// replaced and its connection id returned.
    pub fn register(
        &self,
        charge_point_id: &str,
        connection_id: u64,
        sender: mpsc::UnboundedSender<String>,
    ) -> Option<u64> {
        info!(charge_point_id, connection_id, "Registering charge point session");
        self.sessions
            .insert(
                charge_point_id.to_string(),
                Connection::new(connection_id, charge_point_id, sender),
            )
            .map(|previous| {
                warn!(
                    charge_point_id,
                    replaced = previous.connection_id,
                    "Replaced existing session"
                );
                previous.connection_id
            })
    }

    /// Remove the session if it still belongs to `connection_id`.
    /// Returns `false` when a newer connection has taken over.
    pub fn unregister(&self, charge_point_id: &str, connection_id: u64) -> bool {
        let removed = self
            .sessions
            .remove_if(charge_point_id, |_, conn| conn.connection_id == connection_id)
            .is_some();
        if removed {
            info!(charge_point_id, connection_id, "Unregistered charge point session");
        }
        removed
    }

    pub fn send_to(&self, charge_point_id: &str, message: String) -> Result<(), String> {
        match self.sessions.get(charge_point_id) {
            Some(conn) => conn.send(message),
            None => Err(format!("Charge point {} not connected", charge_point_id)),
        }
    }

    pub fn touch(&self, charge_point_id: &str) {
        if let Some(mut conn) = self.sessions.get_mut(charge_point_id) {
            conn.touch();
        }
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.sessions.contains_key(charge_point_id)
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_keeps_newer_session() {
        let registry = SessionRegistry::new();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        assert_eq!(registry.register("cp-1", 1, old_tx), None);
        assert_eq!(registry.register("cp-1", 2, new_tx), Some(1));

        // the stale connection's teardown must not drop the new one
        assert!(!registry.unregister("cp-1", 1));
        assert!(registry.is_connected("cp-1"));

        registry.send_to("cp-1", "hello".into()).unwrap();
        assert_eq!(new_rx.try_recv().unwrap(), "hello");

        assert!(registry.unregister("cp-1", 2));
        assert_eq!(registry.count(), 0);
        assert!(registry.send_to("cp-1", "gone".into()).is_err());
    }
}
