//! Classification of an entity write into at most one audit event.
//!
//! Priority order, first match wins:
//! 1. no prior version: `*_created` with the full new state
//! 2. completion flips to complete: `*_completed` / `*_closed` carrying the
//!    completion field plus every other field changed by the same write
//! 3. any tracked field differs: `*_updated` with only the changed fields
//! 4. otherwise nothing is emitted

use serde_json::Value;

use crate::error::AppError;
use crate::models::audit_event::{DerivedEvent, EventPayload};
use crate::models::tracked::{snapshot, TrackedEntity, ID_FIELD};

pub fn derive_event<E: TrackedEntity>(
    prior: Option<&E>,
    next: &E,
) -> Result<Option<DerivedEvent>, AppError> {
    let next_fields = snapshot(next)?;
    let entity_id = next.entity_id();

    let Some(prior) = prior else {
        return Ok(Some(DerivedEvent {
            event_type: E::KIND.created(),
            entity_id,
            payload: next_fields,
        }));
    };

    let prior_fields = snapshot(prior)?;
    let mut changed = changed_fields::<E>(&prior_fields, &next_fields);

    if next.is_complete() && !prior.is_complete() {
        if !changed.contains_key(E::COMPLETION_FIELD) {
            let value = next_fields
                .get(E::COMPLETION_FIELD)
                .cloned()
                .unwrap_or(Value::Bool(true));
            changed.insert(E::COMPLETION_FIELD.to_string(), value);
        }
        return Ok(Some(DerivedEvent {
            event_type: E::KIND.completed(),
            entity_id,
            payload: changed,
        }));
    }

    if changed.is_empty() {
        return Ok(None);
    }

    Ok(Some(DerivedEvent {
        event_type: E::KIND.updated(),
        entity_id,
        payload: changed,
    }))
}

fn is_tracked<E: TrackedEntity>(name: &str) -> bool {
    name != ID_FIELD && !E::UNTRACKED_FIELDS.iter().any(|field| *field == name)
}

/// New values of every tracked field that differs between the two snapshots.
fn changed_fields<E: TrackedEntity>(prior: &EventPayload, next: &EventPayload) -> EventPayload {
    let mut changed: EventPayload = next
        .iter()
        .filter(|(name, value)| is_tracked::<E>(name) && prior.get(name.as_str()) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    // A field that stopped serializing reads as cleared.
    for name in prior.keys() {
        if is_tracked::<E>(name) && !next.contains_key(name) {
            changed.insert(name.clone(), Value::Null);
        }
    }

    changed
}
