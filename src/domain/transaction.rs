//! Charging transaction tracked by a connector

use chrono::{DateTime, Utc};

/// Transaction ids come from a per charge point counter and are only
/// unique within the lifetime of that charge point.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i32,
    /// Empty for transactions recovered from MeterValues
    pub id_tag: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn start(id: i32, id_tag: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            id_tag: id_tag.into(),
            started_at,
            stopped_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stopped_at.is_none()
    }
}
