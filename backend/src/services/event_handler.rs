//! Where derived audit events go once the entity write has committed.
//!
//! The handler is picked once at start-up from [`EventHandlerKind`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::audit_event::AuditEvent;
use crate::repositories::audit_event::AuditEventRepositoryTrait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventHandlerKind {
    /// Append to the `audit_events` ledger.
    EventLog,
    /// Emit a structured log record only.
    Tracing,
}

impl fmt::Display for EventHandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventHandlerKind::EventLog => f.write_str("event_log"),
            EventHandlerKind::Tracing => f.write_str("tracing"),
        }
    }
}

impl FromStr for EventHandlerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "event_log" => Ok(EventHandlerKind::EventLog),
            "tracing" => Ok(EventHandlerKind::Tracing),
            other => Err(format!("expected `event_log` or `tracing`, got `{other}`")),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditEventHandler: Send + Sync {
    async fn handle(&self, event: &AuditEvent) -> Result<(), AppError>;
}

pub struct EventLogHandler {
    log: Arc<dyn AuditEventRepositoryTrait>,
}

impl EventLogHandler {
    pub fn new(log: Arc<dyn AuditEventRepositoryTrait>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl AuditEventHandler for EventLogHandler {
    async fn handle(&self, event: &AuditEvent) -> Result<(), AppError> {
        self.log.append(event).await
    }
}

pub struct TracingEventHandler;

#[async_trait]
impl AuditEventHandler for TracingEventHandler {
    async fn handle(&self, event: &AuditEvent) -> Result<(), AppError> {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| AppError::serialization("payload", e))?;
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            entity_id = %event.entity_id,
            timestamp = %event.timestamp,
            payload = %payload,
            "audit event"
        );
        Ok(())
    }
}

pub fn build_event_handler(
    kind: EventHandlerKind,
    log: Arc<dyn AuditEventRepositoryTrait>,
) -> Arc<dyn AuditEventHandler> {
    match kind {
        EventHandlerKind::EventLog => Arc::new(EventLogHandler::new(log)),
        EventHandlerKind::Tracing => Arc::new(TracingEventHandler),
    }
}
