pub mod id;

pub use id::{ActionId, AuditEventId, IncidentId};
