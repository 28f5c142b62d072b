//! WebSocket connection handle

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Outbound side of one live charge point websocket.
#[derive(Debug)]
pub struct Connection {
    /// Distinguishes a reconnect from the session it replaces
    pub connection_id: u64,
    pub charge_point_id: String,
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        connection_id: u64,
        charge_point_id: impl Into<String>,
        sender: mpsc::UnboundedSender<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            connection_id,
            charge_point_id: charge_point_id.into(),
            sender,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn send(&self, message: String) -> Result<(), String> {
        self.sender
            .send(message)
            .map_err(|_| format!("connection to {} closed", self.charge_point_id))
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
