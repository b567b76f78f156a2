//! Write path for tracked entities.
//!
//! `save` reads the prior version and derives the audit event inside the
//! store's write (pre-commit), then hands the event to the configured handler
//! once the write is durable (post-commit). Audit failures never fail or undo
//! the entity write; they are logged and returned in [`SaveOutcome`].

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::models::audit_event::{AuditEvent, DerivedEvent};
use crate::models::tracked::TrackedEntity;
use crate::repositories::entity_store::EntityStore;
use crate::services::change_diff::derive_event;
use crate::services::event_handler::AuditEventHandler;

#[derive(Debug, Default)]
pub struct SaveOutcome {
    /// The event handed to the audit handler, if the write produced one.
    pub event: Option<AuditEvent>,
    /// Set when deriving or recording the audit event failed.
    pub audit_failure: Option<AppError>,
}

pub struct TrackedWriteService<E: TrackedEntity> {
    store: Arc<dyn EntityStore<E>>,
    handler: Arc<dyn AuditEventHandler>,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl<E: TrackedEntity> TrackedWriteService<E> {
    pub fn new(store: Arc<dyn EntityStore<E>>, handler: Arc<dyn AuditEventHandler>) -> Self {
        Self {
            store,
            handler,
            last_timestamp: Mutex::new(None),
        }
    }

    /// Persists `next` and records the audit event describing the change.
    ///
    /// Errors from the store fail the call and no event is derived from them.
    pub async fn save(&self, next: &E) -> Result<SaveOutcome, AppError> {
        let entity_id = next.entity_id();
        let mut derived: Option<Result<Option<DerivedEvent>, AppError>> = None;

        let mut pre_commit = |prior: Option<&E>| {
            derived = Some(derive_event(prior, next));
        };
        self.store.save(next, &mut pre_commit).await?;

        let derived = match derived {
            Some(Ok(Some(derived))) => derived,
            Some(Ok(None)) => {
                tracing::debug!(entity = E::KIND.as_str(), %entity_id, "no tracked field changed");
                return Ok(SaveOutcome::default());
            }
            Some(Err(err)) => {
                tracing::warn!(
                    entity = E::KIND.as_str(),
                    %entity_id,
                    error = %err,
                    code = err.code(),
                    "failed to derive audit event"
                );
                return Ok(SaveOutcome {
                    event: None,
                    audit_failure: Some(err),
                });
            }
            None => {
                let err = AppError::storage("entity store skipped the pre-commit hook");
                tracing::warn!(entity = E::KIND.as_str(), %entity_id, error = %err, "audit event not derived");
                return Ok(SaveOutcome {
                    event: None,
                    audit_failure: Some(err),
                });
            }
        };

        let event = derived.emit(self.next_timestamp());
        match self.handler.handle(&event).await {
            Ok(()) => {
                tracing::debug!(
                    event_type = %event.event_type,
                    %entity_id,
                    "audit event recorded"
                );
                Ok(SaveOutcome {
                    event: Some(event),
                    audit_failure: None,
                })
            }
            Err(err) => {
                tracing::warn!(
                    event_type = %event.event_type,
                    %entity_id,
                    error = %err,
                    code = err.code(),
                    "failed to record audit event"
                );
                Ok(SaveOutcome {
                    event: None,
                    audit_failure: Some(err),
                })
            }
        }
    }

    /// Wall-clock time, never earlier than the previous stamp from this service.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut last = self
            .last_timestamp
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamp = match *last {
            Some(previous) if previous > now => previous,
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}
