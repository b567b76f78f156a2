//! Read-before-write access to tracked entities.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::AppError;
use crate::models::tracked::TrackedEntity;

/// Called by the store with the previously committed version, after it was
/// read and before the new version is committed.
pub type PreCommitHook<'a, E> = dyn FnMut(Option<&E>) + Send + 'a;

/// System of record for a tracked entity type.
#[async_trait]
pub trait EntityStore<E: TrackedEntity>: Send + Sync {
    async fn read_prior(&self, entity_id: &str) -> Result<Option<E>, AppError>;

    /// Persist `next`. The prior version handed to `pre_commit` is read under
    /// the same per-entity lock as the write, so no concurrent save of the same
    /// entity can slip in between.
    async fn save(&self, next: &E, pre_commit: &mut PreCommitHook<'_, E>)
        -> Result<(), AppError>;
}

/// Store backed by a sharded concurrent map; writes lock only the entry's shard.
#[derive(Debug)]
pub struct InMemoryEntityStore<E> {
    rows: DashMap<String, E>,
}

impl<E> Default for InMemoryEntityStore<E> {
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }
}

impl<E: TrackedEntity> InMemoryEntityStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl<E: TrackedEntity> EntityStore<E> for InMemoryEntityStore<E> {
    async fn read_prior(&self, entity_id: &str) -> Result<Option<E>, AppError> {
        Ok(self.rows.get(entity_id).map(|row| row.value().clone()))
    }

    async fn save(
        &self,
        next: &E,
        pre_commit: &mut PreCommitHook<'_, E>,
    ) -> Result<(), AppError> {
        match self.rows.entry(next.entity_id()) {
            Entry::Occupied(mut occupied) => {
                pre_commit(Some(occupied.get()));
                occupied.insert(next.clone());
            }
            Entry::Vacant(vacant) => {
                pre_commit(None);
                vacant.insert(next.clone());
            }
        }
        Ok(())
    }
}
