use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{types::Json, FromRow};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;
use crate::types::AuditEventId;

/// Flat mapping of field name to new value.
pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Incident,
    Action,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Incident => "incident",
            EntityKind::Action => "action",
        }
    }

    pub fn created(&self) -> EventType {
        match self {
            EntityKind::Incident => EventType::IncidentCreated,
            EntityKind::Action => EventType::ActionCreated,
        }
    }

    pub fn updated(&self) -> EventType {
        match self {
            EntityKind::Incident => EventType::IncidentUpdated,
            EntityKind::Action => EventType::ActionUpdated,
        }
    }

    pub fn completed(&self) -> EventType {
        match self {
            EntityKind::Incident => EventType::IncidentClosed,
            EntityKind::Action => EventType::ActionCompleted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    IncidentCreated,
    IncidentUpdated,
    IncidentClosed,
    ActionCreated,
    ActionUpdated,
    ActionCompleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::IncidentCreated => "incident_created",
            EventType::IncidentUpdated => "incident_updated",
            EventType::IncidentClosed => "incident_closed",
            EventType::ActionCreated => "action_created",
            EventType::ActionUpdated => "action_updated",
            EventType::ActionCompleted => "action_completed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incident_created" => Ok(EventType::IncidentCreated),
            "incident_updated" => Ok(EventType::IncidentUpdated),
            "incident_closed" => Ok(EventType::IncidentClosed),
            "action_created" => Ok(EventType::ActionCreated),
            "action_updated" => Ok(EventType::ActionUpdated),
            "action_completed" => Ok(EventType::ActionCompleted),
            other => Err(AppError::storage(format!("unknown event type {other:?}"))),
        }
    }
}

/// The outcome of diffing two versions of an entity, before it is stamped.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedEvent {
    pub event_type: EventType,
    pub entity_id: String,
    pub payload: EventPayload,
}

impl DerivedEvent {
    pub fn emit(self, timestamp: DateTime<Utc>) -> AuditEvent {
        AuditEvent {
            id: AuditEventId::new(),
            timestamp,
            event_type: self.event_type,
            entity_id: self.entity_id,
            payload: self.payload,
        }
    }
}

/// Immutable audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub entity_id: String,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, FromRow)]
pub struct AuditEventRow {
    pub id: AuditEventId,
    pub occurred_at: DateTime<Utc>,
    pub event_type: String,
    pub entity_id: String,
    pub payload: Json<EventPayload>,
}

impl TryFrom<AuditEventRow> for AuditEvent {
    type Error = AppError;

    fn try_from(row: AuditEventRow) -> Result<Self, Self::Error> {
        Ok(AuditEvent {
            id: row.id,
            timestamp: row.occurred_at,
            event_type: row.event_type.parse()?,
            entity_id: row.entity_id,
            payload: row.payload.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_strings_round_trip() {
        for event_type in [
            EventType::IncidentCreated,
            EventType::IncidentUpdated,
            EventType::IncidentClosed,
            EventType::ActionCreated,
            EventType::ActionUpdated,
            EventType::ActionCompleted,
        ] {
            assert_eq!(event_type.as_str().parse::<EventType>().ok(), Some(event_type));
            assert_eq!(
                serde_json::to_value(event_type).expect("serialize"),
                Value::String(event_type.to_string())
            );
        }
        assert!("incident_reopened".parse::<EventType>().is_err());
    }

    #[test]
    fn entity_kind_maps_transitions_to_event_types() {
        assert_eq!(EntityKind::Action.completed(), EventType::ActionCompleted);
        assert_eq!(EntityKind::Incident.completed(), EventType::IncidentClosed);
        assert_eq!(EntityKind::Incident.updated(), EventType::IncidentUpdated);
        assert_eq!(EntityKind::Action.created(), EventType::ActionCreated);
    }
}
