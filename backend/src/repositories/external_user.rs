//! Identity cache storage.
//!
//! Upserts are keyed by `external_id`. When an email moves to a different
//! identity the older owner loses it, so the email column stays unique.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::Instrument;

use crate::error::AppError;
use crate::models::external_user::{normalize_email, ExternalUser};

const MAX_UPSERT_ATTEMPTS: usize = 3;

const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";

const SELECT_COLUMNS: &str =
    "SELECT external_id, display_name, full_name, email, is_deleted, updated_at FROM external_users";

/// Repository trait for the cached directory identities.
///
/// Use `MockExternalUserRepositoryTrait` in unit tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExternalUserRepositoryTrait: Send + Sync {
    /// Find a cached identity by its directory id
    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<ExternalUser>, AppError>;

    /// Find a cached identity by email
    async fn find_by_email(&self, email: &str) -> Result<Option<ExternalUser>, AppError>;

    /// Insert the identity, or overwrite every mutable field of the existing row
    async fn upsert(&self, user: &ExternalUser) -> Result<ExternalUser, AppError>;

    /// List all cached identities ordered by external id
    async fn list_all(&self) -> Result<Vec<ExternalUser>, AppError>;

    /// Count cached identities
    async fn count(&self) -> Result<i64, AppError>;
}

#[derive(Debug, Clone)]
pub struct ExternalUserRepository {
    pool: PgPool,
}

impl ExternalUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_once(&self, user: &ExternalUser) -> Result<ExternalUser, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if let Some(email) = user.email.as_deref() {
            // Rows are locked in key order so two upserts swapping emails queue
            // behind each other.
            sqlx::query(
                "SELECT external_id FROM external_users \
                 WHERE external_id = $1 OR email = $2 \
                 ORDER BY external_id FOR UPDATE",
            )
            .bind(&user.external_id)
            .bind(email)
            .fetch_all(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE external_users SET email = NULL, updated_at = $3 \
                 WHERE email = $1 AND external_id <> $2",
            )
            .bind(email)
            .bind(&user.external_id)
            .bind(user.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        let stored = sqlx::query_as::<_, ExternalUser>(
            "INSERT INTO external_users \
             (external_id, display_name, full_name, email, is_deleted, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (external_id) DO UPDATE SET \
             display_name = EXCLUDED.display_name, \
             full_name = EXCLUDED.full_name, \
             email = EXCLUDED.email, \
             is_deleted = EXCLUDED.is_deleted, \
             updated_at = EXCLUDED.updated_at \
             RETURNING external_id, display_name, full_name, email, is_deleted, updated_at",
        )
        .bind(&user.external_id)
        .bind(&user.display_name)
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(user.is_deleted)
        .bind(user.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stored)
    }
}

/// Conflicts with a concurrent upsert: the same key or email claimed first
/// (unique violation), or two email swaps locking rows in opposite order
/// (deadlock, serialization failure). The losing transaction is rolled back
/// and can simply run again.
fn is_retryable_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation()
                || matches!(
                    db_err.code().as_deref(),
                    Some(DEADLOCK_DETECTED | SERIALIZATION_FAILURE)
                )
        }
        _ => false,
    }
}

#[async_trait]
impl ExternalUserRepositoryTrait for ExternalUserRepository {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ExternalUser>, AppError> {
        let query = format!("{SELECT_COLUMNS} WHERE external_id = $1");
        let user = sqlx::query_as::<_, ExternalUser>(&query)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<ExternalUser>, AppError> {
        let Some(email) = normalize_email(email) else {
            return Ok(None);
        };
        let query = format!("{SELECT_COLUMNS} WHERE email = $1");
        let user = sqlx::query_as::<_, ExternalUser>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn upsert(&self, user: &ExternalUser) -> Result<ExternalUser, AppError> {
        let span = tracing::debug_span!("external_user_upsert", external_id = %user.external_id);
        let user = user.with_normalized_email();

        async {
            let mut attempt = 1;
            loop {
                match self.upsert_once(&user).await {
                    Ok(stored) => return Ok(stored),
                    Err(err) if is_retryable_conflict(&err) && attempt < MAX_UPSERT_ATTEMPTS => {
                        tracing::debug!(
                            attempt,
                            error = %err,
                            "external user upsert collided, retrying"
                        );
                        attempt += 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn list_all(&self) -> Result<Vec<ExternalUser>, AppError> {
        let query = format!("{SELECT_COLUMNS} ORDER BY external_id");
        let users = sqlx::query_as::<_, ExternalUser>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn count(&self) -> Result<i64, AppError> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM external_users")
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }
}

#[derive(Debug, Default)]
struct UserIndex {
    by_id: HashMap<String, ExternalUser>,
    id_by_email: HashMap<String, String>,
}

impl UserIndex {
    fn upsert(&mut self, user: &ExternalUser) {
        if let Some(email) = user.email.as_ref() {
            if let Some(owner) = self.id_by_email.get(email) {
                if *owner != user.external_id {
                    if let Some(previous_owner) = self.by_id.get_mut(owner) {
                        previous_owner.email = None;
                        previous_owner.updated_at = user.updated_at;
                    }
                }
            }
        }

        let stale_email = self
            .by_id
            .get(&user.external_id)
            .and_then(|existing| existing.email.clone())
            .filter(|old| user.email.as_ref() != Some(old));
        if let Some(old) = stale_email {
            self.id_by_email.remove(&old);
        }

        if let Some(email) = user.email.as_ref() {
            self.id_by_email
                .insert(email.clone(), user.external_id.clone());
        }
        self.by_id.insert(user.external_id.clone(), user.clone());
    }
}

/// Process-local identity cache, used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct InMemoryExternalUserRepository {
    index: Mutex<UserIndex>,
}

impl InMemoryExternalUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_index<T>(&self, f: impl FnOnce(&mut UserIndex) -> T) -> Result<T, AppError> {
        let mut index = self
            .index
            .lock()
            .map_err(|_| AppError::storage("identity cache lock poisoned"))?;
        Ok(f(&mut index))
    }
}

#[async_trait]
impl ExternalUserRepositoryTrait for InMemoryExternalUserRepository {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ExternalUser>, AppError> {
        self.with_index(|index| index.by_id.get(external_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<ExternalUser>, AppError> {
        let Some(email) = normalize_email(email) else {
            return Ok(None);
        };
        self.with_index(|index| {
            index
                .id_by_email
                .get(&email)
                .and_then(|id| index.by_id.get(id))
                .cloned()
        })
    }

    async fn upsert(&self, user: &ExternalUser) -> Result<ExternalUser, AppError> {
        let user = user.with_normalized_email();
        self.with_index(|index| index.upsert(&user))?;
        Ok(user)
    }

    async fn list_all(&self) -> Result<Vec<ExternalUser>, AppError> {
        let mut users = self.with_index(|index| index.by_id.values().cloned().collect::<Vec<_>>())?;
        users.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(users)
    }

    async fn count(&self) -> Result<i64, AppError> {
        self.with_index(|index| index.by_id.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: &str, email: Option<&str>) -> ExternalUser {
        ExternalUser {
            external_id: id.to_string(),
            display_name: id.to_lowercase(),
            full_name: format!("User {id}"),
            email: email.map(str::to_string),
            is_deleted: false,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_inserts_then_overwrites_in_place() {
        let repo = InMemoryExternalUserRepository::new();
        repo.upsert(&user("U1", Some("a@example.com")))
            .await
            .expect("insert");

        let mut renamed = user("U1", Some("a@example.com"));
        renamed.display_name = "renamed".into();
        renamed.is_deleted = true;
        repo.upsert(&renamed).await.expect("update");

        assert_eq!(repo.count().await.expect("count"), 1);
        let stored = repo
            .find_by_external_id("U1")
            .await
            .expect("find")
            .expect("row exists");
        assert_eq!(stored.display_name, "renamed");
        assert!(stored.is_deleted);
    }

    #[tokio::test]
    async fn email_moves_to_the_latest_owner() {
        let repo = InMemoryExternalUserRepository::new();
        repo.upsert(&user("U1", Some("shared@example.com")))
            .await
            .expect("first owner");
        repo.upsert(&user("U2", Some("shared@example.com")))
            .await
            .expect("second owner");

        let owner = repo
            .find_by_email("shared@example.com")
            .await
            .expect("find")
            .expect("owner exists");
        assert_eq!(owner.external_id, "U2");

        let previous = repo
            .find_by_external_id("U1")
            .await
            .expect("find")
            .expect("row kept");
        assert_eq!(previous.email, None);
        assert_eq!(repo.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn changing_email_releases_the_old_address() {
        let repo = InMemoryExternalUserRepository::new();
        repo.upsert(&user("U1", Some("old@example.com")))
            .await
            .expect("insert");
        repo.upsert(&user("U1", Some("new@example.com")))
            .await
            .expect("update");

        assert!(repo
            .find_by_email("old@example.com")
            .await
            .expect("find old")
            .is_none());
        assert!(repo
            .find_by_email("new@example.com")
            .await
            .expect("find new")
            .is_some());
    }

    #[tokio::test]
    async fn email_lookup_ignores_case() {
        let repo = InMemoryExternalUserRepository::new();
        let stored = repo
            .upsert(&user("U1", Some("Glenda@South.oz.coven")))
            .await
            .expect("insert");
        assert_eq!(stored.email.as_deref(), Some("glenda@south.oz.coven"));

        let found = repo
            .find_by_email("GLENDA@south.OZ.coven")
            .await
            .expect("find")
            .expect("row exists");
        assert_eq!(found.external_id, "U1");

        repo.upsert(&user("U2", Some("glenda@SOUTH.oz.coven")))
            .await
            .expect("second owner");
        let previous = repo
            .find_by_external_id("U1")
            .await
            .expect("find")
            .expect("row kept");
        assert_eq!(previous.email, None);
    }

    #[derive(Debug)]
    struct PgError {
        code: &'static str,
    }

    impl std::fmt::Display for PgError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "postgres error {}", self.code)
        }
    }

    impl std::error::Error for PgError {}

    impl sqlx::error::DatabaseError for PgError {
        fn message(&self) -> &str {
            "postgres error"
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some(self.code.into())
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            match self.code {
                "23505" => sqlx::error::ErrorKind::UniqueViolation,
                _ => sqlx::error::ErrorKind::Other,
            }
        }
    }

    fn db_error(code: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(PgError { code }))
    }

    #[test]
    fn concurrent_write_conflicts_are_retried() {
        assert!(is_retryable_conflict(&db_error("23505")));
        assert!(is_retryable_conflict(&db_error("40P01")));
        assert!(is_retryable_conflict(&db_error("40001")));

        assert!(!is_retryable_conflict(&db_error("23503")));
        assert!(!is_retryable_conflict(&sqlx::Error::RowNotFound));
        assert!(!is_retryable_conflict(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn mock_external_user_repository_is_send_sync() {
        fn check_send_sync<T: Send + Sync>() {}
        check_send_sync::<MockExternalUserRepositoryTrait>();
    }
}
