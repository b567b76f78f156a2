pub mod action;
pub mod audit_event;
pub mod entity_store;
pub mod external_user;
pub mod incident;

pub use action::ActionRepository;
pub use audit_event::{
    AuditEventRepository, AuditEventRepositoryTrait, InMemoryAuditEventRepository,
};
pub use entity_store::{EntityStore, InMemoryEntityStore, PreCommitHook};
pub use external_user::{
    ExternalUserRepository, ExternalUserRepositoryTrait, InMemoryExternalUserRepository,
};
pub use incident::IncidentRepository;
