//! Incident response backend: audit events derived from entity writes and a
//! local cache of directory identities.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod services;
pub mod types;
