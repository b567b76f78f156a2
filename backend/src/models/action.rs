use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::audit_event::EntityKind;
use crate::models::tracked::{TrackedEntity, STORED_SUBSEC_DIGITS};
use crate::types::{ActionId, IncidentId};

/// A remediation step attached to an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Action {
    pub id: ActionId,
    pub incident_id: IncidentId,
    pub details: String,
    pub done: bool,
    /// External id of the user owning the action.
    #[sqlx(rename = "user_external_id")]
    pub user: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Action {
    pub fn new(incident_id: IncidentId, details: impl Into<String>) -> Self {
        Self {
            id: ActionId::new(),
            incident_id,
            details: details.into(),
            done: false,
            user: None,
            created_at: Utc::now().trunc_subsecs(STORED_SUBSEC_DIGITS),
        }
    }
}

impl TrackedEntity for Action {
    const KIND: EntityKind = EntityKind::Action;
    const COMPLETION_FIELD: &'static str = "done";
    const UNTRACKED_FIELDS: &'static [&'static str] = &["created_at"];

    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn is_complete(&self) -> bool {
        self.done
    }

    fn round_timestamps(&mut self) {
        self.created_at = self.created_at.trunc_subsecs(STORED_SUBSEC_DIGITS);
    }
}
