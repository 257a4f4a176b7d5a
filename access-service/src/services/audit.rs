//! Audit trail sinks.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::models::AuditRecord;

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<(), anyhow::Error>;
}

/// Emits each record as a structured `audit` event.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(&self, record: AuditRecord) -> Result<(), anyhow::Error> {
        tracing::info!(
            target: "audit",
            record_id = %record.record_id,
            action = %record.action,
            origin = %record.origin,
            target_key = record.target.as_deref().unwrap_or("-"),
            outcome = %record.outcome,
            details = %record.details,
            "Audit record"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn records_for(&self, action: &str) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.action == action)
            .collect()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, record: AuditRecord) -> Result<(), anyhow::Error> {
        self.records
            .lock()
            .map_err(|e| anyhow::anyhow!("Audit log mutex poisoned: {}", e))?
            .push(record);
        Ok(())
    }
}
