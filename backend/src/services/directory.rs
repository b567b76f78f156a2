//! Contract of the external identity directory.

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::external_user::DirectoryProfile;

/// One page of the bulk user listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryPage {
    pub entries: Vec<DirectoryProfile>,
    /// Cursor of the following page; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Lookups return `Ok(None)` when the directory knows no such identity and
/// `Err(AppError::DirectoryUnavailable)` when it could not answer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn lookup_by_id(&self, id: &str) -> Result<Option<DirectoryProfile>, AppError>;

    async fn lookup_by_email(&self, email: &str) -> Result<Option<DirectoryProfile>, AppError>;

    async fn list_page(
        &self,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<DirectoryPage, AppError>;
}
