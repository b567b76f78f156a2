//! Append-only audit event ledger.

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use std::sync::Mutex;

use crate::error::AppError;
use crate::models::audit_event::{AuditEvent, AuditEventRow};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditEventRepositoryTrait: Send + Sync {
    /// Append one event. Either the full row is written or nothing is.
    async fn append(&self, event: &AuditEvent) -> Result<(), AppError>;

    /// Events recorded for one entity, oldest first
    async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<AuditEvent>, AppError>;
}

#[derive(Debug, Clone)]
pub struct AuditEventRepository {
    pool: PgPool,
}

impl AuditEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditEventRepositoryTrait for AuditEventRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO audit_events (id, occurred_at, event_type, entity_id, payload) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.id)
        .bind(event.timestamp)
        .bind(event.event_type.as_str())
        .bind(&event.entity_id)
        .bind(Json(&event.payload))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<AuditEvent>, AppError> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT id, occurred_at, event_type, entity_id, payload FROM audit_events \
             WHERE entity_id = $1 ORDER BY occurred_at ASC, id ASC",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditEvent::try_from).collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditEventRepository {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event appended so far, in append order.
    pub fn snapshot(&self) -> Result<Vec<AuditEvent>, AppError> {
        self.events
            .lock()
            .map(|events| events.clone())
            .map_err(|_| AppError::storage("event log lock poisoned"))
    }
}

#[async_trait]
impl AuditEventRepositoryTrait for InMemoryAuditEventRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), AppError> {
        self.events
            .lock()
            .map_err(|_| AppError::storage("event log lock poisoned"))?
            .push(event.clone());
        Ok(())
    }

    async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<AuditEvent>, AppError> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|event| event.entity_id == entity_id)
            .collect())
    }
}
