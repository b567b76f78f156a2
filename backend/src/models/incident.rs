use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::audit_event::EntityKind;
use crate::models::tracked::{TrackedEntity, STORED_SUBSEC_DIGITS};
use crate::types::IncidentId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Incident {
    pub id: IncidentId,
    pub report: String,
    /// External ids of the people involved.
    pub reporter: Option<String>,
    pub lead: Option<String>,
    pub summary: Option<String>,
    pub impact: Option<String>,
    pub severity: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Set once the incident is closed.
    pub end_time: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn new(report: impl Into<String>, reporter: Option<String>) -> Self {
        Self {
            id: IncidentId::new(),
            report: report.into(),
            reporter,
            lead: None,
            summary: None,
            impact: None,
            severity: None,
            start_time: Utc::now().trunc_subsecs(STORED_SUBSEC_DIGITS),
            end_time: None,
        }
    }

    pub fn close(&mut self) {
        self.end_time = Some(Utc::now().trunc_subsecs(STORED_SUBSEC_DIGITS));
    }

    pub fn reopen(&mut self) {
        self.end_time = None;
    }
}

impl TrackedEntity for Incident {
    const KIND: EntityKind = EntityKind::Incident;
    const COMPLETION_FIELD: &'static str = "end_time";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn is_complete(&self) -> bool {
        self.end_time.is_some()
    }

    fn round_timestamps(&mut self) {
        self.start_time = self.start_time.trunc_subsecs(STORED_SUBSEC_DIGITS);
        self.end_time = self.end_time.map(|t| t.trunc_subsecs(STORED_SUBSEC_DIGITS));
    }
}
