//! Audit trail for security-relevant identity events.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::error::StoreError;
use crate::models::{AuditAction, AuditEvent};

/// Durable destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError>;
}

/// Records audit events to the log and the configured sink.
///
/// A sink failure is logged and swallowed: it never fails the operation
/// being audited.
#[derive(Clone)]
pub struct AuditService {
    sink: Arc<dyn AuditSink>,
}

impl AuditService {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn record(&self, event: AuditEvent) {
        if event.success {
            tracing::info!(
                action = event.action.as_str(),
                actor = %event.actor_label,
                reason = event.reason.as_deref().unwrap_or(""),
                "Audit event"
            );
        } else {
            tracing::warn!(
                action = event.action.as_str(),
                actor = %event.actor_label,
                reason = event.reason.as_deref().unwrap_or(""),
                detail = %event.event_data,
                "Audit event"
            );
        }

        if let Err(e) = self.sink.append(&event).await {
            tracing::error!(
                error = %e,
                action = event.action.as_str(),
                event_id = %event.event_id,
                "Failed to write audit event"
            );
        }
    }
}

/// In-memory sink used by tests and local runs.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.events
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("audit sink lock poisoned")))?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _event: &AuditEvent) -> Result<(), StoreError> {
            Err(StoreError::Backend(anyhow::anyhow!("disk full")))
        }
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed() {
        let audit = AuditService::new(Arc::new(FailingSink));
        audit
            .record(AuditEvent::anonymous(AuditAction::AuthorizationDenied, false))
            .await;
    }

    #[tokio::test]
    async fn memory_sink_keeps_events_in_order() {
        let sink = Arc::new(MemoryAuditSink::new());
        let audit = AuditService::new(sink.clone());
        audit
            .record(AuditEvent::anonymous(AuditAction::SessionCreated, true))
            .await;
        audit
            .record(AuditEvent::anonymous(AuditAction::SessionRevoked, true))
            .await;

        let actions: Vec<AuditAction> = sink.events().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::SessionCreated, AuditAction::SessionRevoked]
        );
    }
}
