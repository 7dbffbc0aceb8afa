//! In-memory job store with per-job locking.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use display_types::{JobFilter, JobId, JobRecord, JobStore, StoreError, Transition};
use std::sync::Arc;

/// In-memory implementation of JobStore.
///
/// Records live in a sharded map, so a transition only locks the shard holding its
/// job. Idempotency keys are indexed separately and claimed atomically on create.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    /// job_id -> record.
    jobs: Arc<DashMap<JobId, JobRecord>>,
    /// idempotency key -> job_id.
    keys: Arc<DashMap<String, JobId>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn insert_new(&self, job: JobRecord) -> Result<JobRecord, StoreError> {
        match self.jobs.entry(job.id) {
            Entry::Occupied(_) => Err(StoreError::Other(format!("duplicate job id: {}", job.id))),
            Entry::Vacant(v) => {
                v.insert(job.clone());
                Ok(job)
            }
        }
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: JobRecord) -> Result<JobRecord, StoreError> {
        let Some(key) = job.idempotency_key.clone() else {
            return self.insert_new(job);
        };
        match self.keys.entry(key) {
            Entry::Occupied(e) => Err(StoreError::Conflict { existing: *e.get() }),
            Entry::Vacant(v) => {
                let id = job.id;
                let created = self.insert_new(job)?;
                v.insert(id);
                Ok(created)
            }
        }
    }

    async fn get(&self, id: JobId) -> Result<JobRecord, StoreError> {
        self.jobs
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_state(&self, id: JobId, transition: Transition) -> Result<JobRecord, StoreError> {
        let mut entry = self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry.apply(&transition)?;
        Ok(entry.value().clone())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        let mut out: Vec<JobRecord> = self
            .jobs
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use display_types::{JobKind, JobPayload, JobState};

    fn job(key: Option<&str>) -> JobRecord {
        JobRecord::new(
            JobId::new(),
            JobPayload::new(JobKind::Image, "smb://media/cover.png"),
            5,
            key.map(String::from),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = InMemoryJobStore::new();
        let j = store.create(job(None)).await.unwrap();
        let got = store.get(j.id).await.unwrap();
        assert_eq!(got, j);
        assert!(matches!(
            store.get(JobId::new()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn idempotency_key_conflicts() {
        let store = InMemoryJobStore::new();
        let first = store.create(job(Some("k1"))).await.unwrap();
        match store.create(job(Some("k1"))).await {
            Err(StoreError::Conflict { existing }) => assert_eq!(existing, first.id),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_cas_has_one_winner() {
        let store = InMemoryJobStore::new();
        let id = store.create(job(None)).await.unwrap().id;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_state(
                        id,
                        Transition::new(JobState::Pending, JobState::Queued, Utc::now()),
                    )
                    .await
            }));
        }
        let mut wins = 0;
        let mut conflicts = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => wins += 1,
                Err(StoreError::StateConflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 15);
        let after = store.get(id).await.unwrap();
        assert_eq!(after.history.len(), 2);
    }

    #[tokio::test]
    async fn list_filters_and_orders_by_created_at() {
        let store = InMemoryJobStore::new();
        let base = Utc::now();
        let mut ids = Vec::new();
        for offset in [3, 1, 2] {
            let mut j = job(None);
            j.created_at = base + Duration::seconds(offset);
            j.updated_at = j.created_at;
            ids.push((offset, store.create(j).await.unwrap().id));
        }
        ids.sort();
        let listed: Vec<JobId> = store
            .list(&JobFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(listed, ids.iter().map(|(_, id)| *id).collect::<Vec<_>>());

        store
            .update_state(
                ids[0].1,
                Transition::new(JobState::Pending, JobState::Failed, Utc::now())
                    .with_error("dispatch failure"),
            )
            .await
            .unwrap();
        let failed = store
            .list(&JobFilter::with_states(&[JobState::Failed]))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, ids[0].1);

        let counts = store.count_by_state().await.unwrap();
        assert_eq!(counts.get(&JobState::Pending), Some(&2));
        assert_eq!(counts.get(&JobState::Failed), Some(&1));

        let limited = store.list(&JobFilter::default().limit(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
    }
}
