use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::incident::Incident;
use crate::repositories::entity_store::{EntityStore, PreCommitHook};
use crate::types::IncidentId;

const SELECT_INCIDENT: &str = "SELECT id, report, reporter, lead, summary, impact, severity, \
     start_time, end_time FROM incidents WHERE id = $1";

#[derive(Debug, Clone)]
pub struct IncidentRepository {
    pool: PgPool,
}

impl IncidentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: IncidentId) -> Result<Option<Incident>, AppError> {
        let incident = sqlx::query_as::<_, Incident>(SELECT_INCIDENT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(incident)
    }
}

#[async_trait]
impl EntityStore<Incident> for IncidentRepository {
    async fn read_prior(&self, entity_id: &str) -> Result<Option<Incident>, AppError> {
        // Ids that are not UUIDs were never written by this store.
        match entity_id.parse::<IncidentId>() {
            Ok(id) => self.find_by_id(id).await,
            Err(_) => Ok(None),
        }
    }

    async fn save(
        &self,
        next: &Incident,
        pre_commit: &mut PreCommitHook<'_, Incident>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('incidents:' || $1))")
            .bind(next.id)
            .execute(&mut *tx)
            .await?;

        let prior = sqlx::query_as::<_, Incident>(SELECT_INCIDENT)
            .bind(next.id)
            .fetch_optional(&mut *tx)
            .await?;
        pre_commit(prior.as_ref());

        sqlx::query(
            "INSERT INTO incidents \
             (id, report, reporter, lead, summary, impact, severity, start_time, end_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO UPDATE SET \
             report = EXCLUDED.report, \
             reporter = EXCLUDED.reporter, \
             lead = EXCLUDED.lead, \
             summary = EXCLUDED.summary, \
             impact = EXCLUDED.impact, \
             severity = EXCLUDED.severity, \
             start_time = EXCLUDED.start_time, \
             end_time = EXCLUDED.end_time",
        )
        .bind(next.id)
        .bind(&next.report)
        .bind(&next.reporter)
        .bind(&next.lead)
        .bind(&next.summary)
        .bind(&next.impact)
        .bind(&next.severity)
        .bind(next.start_time)
        .bind(next.end_time)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
