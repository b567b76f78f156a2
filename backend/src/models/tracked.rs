//! The capability the audit pipeline needs from a persisted record.

use serde::Serialize;
use serde_json::Value;

use crate::error::AppError;
use crate::models::audit_event::{EntityKind, EventPayload};

/// Payload key carrying the entity's identifier.
pub const ID_FIELD: &str = "id";

/// Postgres `timestamptz` keeps microseconds.
pub const STORED_SUBSEC_DIGITS: u16 = 6;

pub trait TrackedEntity: Serialize + Clone + Send + Sync + 'static {
    const KIND: EntityKind;
    /// Field whose transition into the completed state is reported as a
    /// completion event rather than a plain update.
    const COMPLETION_FIELD: &'static str;
    /// Fields left out of update diffs. They still appear on creation.
    const UNTRACKED_FIELDS: &'static [&'static str] = &[];

    fn entity_id(&self) -> String;

    fn is_complete(&self) -> bool;

    /// Drops timestamp precision the system of record cannot keep, so a
    /// version read back from storage compares equal to the one written.
    fn round_timestamps(&mut self) {}
}

/// Serializes an entity into a flat field map.
///
/// Nested objects and arrays are rejected so every payload value is a
/// self-contained scalar snapshot. Timestamps are taken at storage precision.
pub fn snapshot<E: TrackedEntity>(entity: &E) -> Result<EventPayload, AppError> {
    let mut stored = entity.clone();
    stored.round_timestamps();
    let value = serde_json::to_value(&stored)
        .map_err(|e| AppError::serialization(E::KIND.as_str(), e))?;

    let Value::Object(fields) = value else {
        return Err(AppError::serialization(
            E::KIND.as_str(),
            "entity does not serialize to a field map",
        ));
    };

    if let Some((name, _)) = fields
        .iter()
        .find(|(_, value)| value.is_object() || value.is_array())
    {
        return Err(AppError::serialization(
            name.as_str(),
            "nested values cannot be stored in a flat payload",
        ));
    }

    Ok(fields)
}
