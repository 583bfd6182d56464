//! Audit sinks and the per-attempt invocation record.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::domain::TenantId;

/// `event_type` used for every invocation record.
pub const INVOCATION_EVENT: &str = "tool.invocation";

/// Destination for audit events.
pub trait AuditLogger: Send + Sync {
    fn log(&self, event_type: &str, data: Value, tenant_id: &TenantId);
}

/// Outcome of one audited attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    /// Refused before any I/O.
    Rejected,
    /// Dry-run.
    Simulated,
}

/// One record per invocation attempt. Payloads are scrubbed before they
/// land here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub tool_name: String,
    pub domain_name: String,
    pub attempt: u32,
    pub dry_run: bool,
    pub outcome: AuditOutcome,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_digest: Option<String>,
}

impl AuditRecord {
    pub fn new(tenant_id: TenantId, tool_name: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            tenant_id,
            tool_name: tool_name.into(),
            domain_name: String::new(),
            attempt: 0,
            dry_run: false,
            outcome,
            arguments: Value::Null,
            response: None,
            error: None,
            status_code: None,
            duration_ms: 0,
            policy_digest: None,
        }
    }
}

/// Writes audit events as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log(&self, event_type: &str, data: Value, tenant_id: &TenantId) {
        info!(
            event = "audit",
            audit_event = %event_type,
            tenant_id = %tenant_id,
            data = %data,
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    pub event_type: String,
    pub tenant_id: TenantId,
    pub data: Value,
}

/// Keeps every event in memory. Used by tests and the CLI.
#[derive(Debug, Default)]
pub struct InMemoryAuditLogger {
    events: Mutex<Vec<LoggedEvent>>,
}

impl InMemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LoggedEvent> {
        self.events.lock().clone()
    }

    /// Events of type [`INVOCATION_EVENT`] decoded as records.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == INVOCATION_EVENT)
            .filter_map(|e| serde_json::from_value(e.data.clone()).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditLogger for InMemoryAuditLogger {
    fn log(&self, event_type: &str, data: Value, tenant_id: &TenantId) {
        self.events.lock().push(LoggedEvent {
            event_type: event_type.to_string(),
            tenant_id: tenant_id.clone(),
            data,
        });
    }
}
