use thiserror::Error;

/// Errors raised by the identity cache, the audit pipeline and their stores.
#[derive(Debug, Error)]
pub enum AppError {
    /// The directory has no identity matching the requested key.
    #[error("{0}")]
    NotFound(String),
    /// The directory service could not be reached or answered with a failure.
    #[error("directory unavailable: {0}")]
    DirectoryUnavailable(#[source] anyhow::Error),
    /// A field of a tracked entity cannot be represented in an event payload.
    #[error("cannot serialize field `{field}`: {reason}")]
    Serialization { field: String, reason: String },
    /// The event log, the identity cache table or the entity store failed.
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AppError {
    /// Stable machine-readable code, used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DirectoryUnavailable(_) => "DIRECTORY_UNAVAILABLE",
            AppError::Serialization { .. } => "SERIALIZATION_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }

    pub fn serialization(field: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Serialization {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        AppError::Storage(anyhow::anyhow!(message.into()))
    }

    pub fn directory(message: impl Into<String>) -> Self {
        AppError::DirectoryUnavailable(anyhow::anyhow!(message.into()))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err.into())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::DirectoryUnavailable(err.into())
    }
}
