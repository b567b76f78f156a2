//! Data models shared by the repositories and services.

pub mod action;
pub mod audit_event;
pub mod external_user;
pub mod incident;
pub mod tracked;
