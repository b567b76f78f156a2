//! Lookup-with-fallback and bulk refresh of the local identity cache.
//!
//! Single lookups serve cached rows without touching the directory; misses
//! are fetched, upserted and returned. Absence is never cached. Bulk refresh
//! walks the directory listing page by page and applies each page before
//! fetching the next, so an interrupted refresh keeps the work already done.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::models::external_user::{DirectoryProfile, ExternalUser};
use crate::repositories::external_user::ExternalUserRepositoryTrait;
use crate::services::directory::DirectoryClient;

/// Outcome of a bulk refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub pages: usize,
    pub upserted: usize,
    pub skipped_bots: usize,
    /// False when the refresh was abandoned before the last page.
    pub completed: bool,
}

#[derive(Clone)]
pub struct IdentityCacheService {
    users: Arc<dyn ExternalUserRepositoryTrait>,
    directory: Arc<dyn DirectoryClient>,
    page_size: u32,
}

impl IdentityCacheService {
    pub fn new(
        users: Arc<dyn ExternalUserRepositoryTrait>,
        directory: Arc<dyn DirectoryClient>,
        page_size: u32,
    ) -> Self {
        Self {
            users,
            directory,
            page_size: page_size.max(1),
        }
    }

    /// Returns the cached identity for `external_id`, consulting the directory on a miss.
    pub async fn resolve_by_id(&self, external_id: &str) -> Result<ExternalUser, AppError> {
        if let Some(user) = self.users.find_by_external_id(external_id).await? {
            tracing::debug!(external_id, "identity cache hit");
            return Ok(user);
        }

        tracing::debug!(external_id, "identity cache miss, querying directory");
        let profile = self
            .directory
            .lookup_by_id(external_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no directory user with id {external_id}"))
            })?;

        self.store(&profile).await
    }

    /// Returns the cached identity owning `email`, consulting the directory on a miss.
    pub async fn resolve_by_email(&self, email: &str) -> Result<ExternalUser, AppError> {
        if let Some(user) = self.users.find_by_email(email).await? {
            tracing::debug!(email, "identity cache hit");
            return Ok(user);
        }

        tracing::debug!(email, "identity cache miss, querying directory");
        let profile = self
            .directory
            .lookup_by_email(email)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no directory user with email {email}")))?;

        // Keyed by the directory id, so a row cached earlier by id is updated in place.
        self.store(&profile).await
    }

    /// Synchronises the cache with the full directory listing.
    ///
    /// Rows are only inserted or updated, never removed. With `exclude_bots`
    /// set, bot accounts are neither created nor updated.
    pub async fn refresh_all(&self, exclude_bots: bool) -> Result<RefreshSummary, AppError> {
        let mut summary = RefreshSummary::default();
        self.refresh_pages(exclude_bots, &mut summary).await?;
        Ok(summary)
    }

    /// Like [`refresh_all`](Self::refresh_all), but stops fetching pages once
    /// `timeout` elapses. The partial summary is returned with `completed = false`.
    pub async fn refresh_all_with_timeout(
        &self,
        exclude_bots: bool,
        timeout: Duration,
    ) -> Result<RefreshSummary, AppError> {
        let mut summary = RefreshSummary::default();
        let outcome =
            tokio::time::timeout(timeout, self.refresh_pages(exclude_bots, &mut summary)).await;
        match outcome {
            Ok(result) => result.map(|()| summary),
            Err(_) => {
                tracing::warn!(
                    pages = summary.pages,
                    upserted = summary.upserted,
                    timeout_secs = timeout.as_secs(),
                    "user cache refresh abandoned at deadline"
                );
                Ok(summary)
            }
        }
    }

    async fn refresh_pages(
        &self,
        exclude_bots: bool,
        summary: &mut RefreshSummary,
    ) -> Result<(), AppError> {
        let mut cursor: Option<String> = None;
        let mut seen_cursors: HashSet<String> = HashSet::new();

        loop {
            let page = match self.directory.list_page(cursor.take(), self.page_size).await {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        code = err.code(),
                        pages = summary.pages,
                        upserted = summary.upserted,
                        "user cache refresh aborted, applied pages are kept"
                    );
                    return Err(err);
                }
            };
            summary.pages += 1;

            for profile in &page.entries {
                if exclude_bots && profile.is_bot {
                    summary.skipped_bots += 1;
                    continue;
                }
                self.store(profile).await?;
                summary.upserted += 1;
            }
            tracing::debug!(
                page = summary.pages,
                entries = page.entries.len(),
                "applied directory page"
            );

            match page.next_cursor {
                // A listing that hands out a cursor twice would never end.
                Some(next) if !seen_cursors.insert(next.clone()) => {
                    return Err(AppError::directory(format!(
                        "directory listing repeated cursor {next:?}"
                    )));
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        summary.completed = true;
        tracing::info!(
            pages = summary.pages,
            upserted = summary.upserted,
            skipped_bots = summary.skipped_bots,
            "user cache refresh complete"
        );
        Ok(())
    }

    async fn store(&self, profile: &DirectoryProfile) -> Result<ExternalUser, AppError> {
        self.users
            .upsert(&ExternalUser::from_profile(profile, Utc::now()))
            .await
    }
}
