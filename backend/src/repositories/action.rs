use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::action::Action;
use crate::repositories::entity_store::{EntityStore, PreCommitHook};
use crate::types::ActionId;

const SELECT_ACTION: &str = "SELECT id, incident_id, details, done, user_external_id, created_at \
     FROM actions WHERE id = $1";

#[derive(Debug, Clone)]
pub struct ActionRepository {
    pool: PgPool,
}

impl ActionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: ActionId) -> Result<Option<Action>, AppError> {
        let action = sqlx::query_as::<_, Action>(SELECT_ACTION)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(action)
    }
}

#[async_trait]
impl EntityStore<Action> for ActionRepository {
    async fn read_prior(&self, entity_id: &str) -> Result<Option<Action>, AppError> {
        // Ids that are not UUIDs were never written by this store.
        match entity_id.parse::<ActionId>() {
            Ok(id) => self.find_by_id(id).await,
            Err(_) => Ok(None),
        }
    }

    async fn save(
        &self,
        next: &Action,
        pre_commit: &mut PreCommitHook<'_, Action>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('actions:' || $1))")
            .bind(next.id)
            .execute(&mut *tx)
            .await?;

        let prior = sqlx::query_as::<_, Action>(SELECT_ACTION)
            .bind(next.id)
            .fetch_optional(&mut *tx)
            .await?;
        pre_commit(prior.as_ref());

        sqlx::query(
            "INSERT INTO actions (id, incident_id, details, done, user_external_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET \
             incident_id = EXCLUDED.incident_id, \
             details = EXCLUDED.details, \
             done = EXCLUDED.done, \
             user_external_id = EXCLUDED.user_external_id",
        )
        .bind(next.id)
        .bind(next.incident_id)
        .bind(&next.details)
        .bind(next.done)
        .bind(&next.user)
        .bind(next.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
