use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user record as reported by the external directory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryProfile {
    pub id: String,
    pub display_name: String,
    pub full_name: String,
    pub email: Option<String>,
    pub is_deleted: bool,
    /// Only consulted by bulk refresh; never stored.
    pub is_bot: bool,
}

/// Locally cached copy of a directory identity.
///
/// Rows are never removed: directory-side deactivation is mirrored through
/// `is_deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ExternalUser {
    pub external_id: String,
    pub display_name: String,
    pub full_name: String,
    pub email: Option<String>,
    pub is_deleted: bool,
    pub updated_at: DateTime<Utc>,
}

/// Canonical form of an email address: trimmed and lowercased. The directory
/// matches addresses without regard to case, so the cache does too.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim();
    (!email.is_empty()).then(|| email.to_lowercase())
}

impl ExternalUser {
    /// Copy of this row with its email in canonical form.
    pub fn with_normalized_email(&self) -> Self {
        Self {
            email: self.email.as_deref().and_then(normalize_email),
            ..self.clone()
        }
    }

    pub fn from_profile(profile: &DirectoryProfile, observed_at: DateTime<Utc>) -> Self {
        Self {
            external_id: profile.id.clone(),
            display_name: profile.display_name.clone(),
            full_name: profile.full_name.clone(),
            email: profile.email.as_deref().and_then(normalize_email),
            is_deleted: profile.is_deleted,
            updated_at: observed_at,
        }
    }
}
