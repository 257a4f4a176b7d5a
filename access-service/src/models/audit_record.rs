//! Structured audit trail entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: Uuid,
    /// e.g. `license.activate`, `two_factor.disable`
    pub action: String,
    /// Client address, domain or user id that triggered the action.
    pub origin: String,
    pub target: Option<String>,
    pub outcome: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        action: impl Into<String>,
        origin: impl Into<String>,
        target: Option<String>,
        outcome: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            action: action.into(),
            origin: origin.into(),
            target,
            outcome: outcome.into(),
            details,
            created_at: Utc::now(),
        }
    }
}
