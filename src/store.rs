//! Persistence port for job records.
//!
//! The orchestrator only needs `create`, `get`, `update` and `delete`; the
//! listing and listening-progress methods serve the surrounding application.
//! [`MemoryJobStore`] is the bundled implementation. A database-backed store
//! implements the same trait.

use crate::error::StoreError;
use crate::job::{ConversionJob, JobId, JobPatch, JobWithProgress, ListeningProgress, NewJob};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> Result<ConversionJob, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<ConversionJob>, StoreError>;

    /// Apply a partial update atomically and stamp `updated_at`.
    /// Fails with [`StoreError::NotFound`] for an unknown id.
    async fn update(&self, id: JobId, patch: JobPatch) -> Result<ConversionJob, StoreError>;

    /// Remove the record and any listening progress attached to it.
    /// Deleting an unknown id is not an error.
    async fn delete(&self, id: JobId) -> Result<(), StoreError>;

    /// The owner's jobs, newest first, each with the owner's playback position.
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<JobWithProgress>, StoreError>;

    /// Upsert the playback position of `owner` in job `job_id`.
    async fn save_listening_progress(
        &self,
        owner: &str,
        job_id: JobId,
        current_time: f64,
        completed: bool,
    ) -> Result<ListeningProgress, StoreError>;

    async fn listening_progress(
        &self,
        owner: &str,
        job_id: JobId,
    ) -> Result<Option<ListeningProgress>, StoreError>;
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, ConversionJob>,
    listening: HashMap<(String, JobId), ListeningProgress>,
}

/// In-process store. Each method holds the lock for its whole body, so a
/// single update is atomic with respect to concurrent readers.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Tables>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<ConversionJob, StoreError> {
        let record = ConversionJob::from_new(job);
        let mut tables = self.inner.write().await;
        if tables.jobs.contains_key(&record.id) {
            return Err(StoreError::Backend(format!(
                "job {} already exists",
                record.id
            )));
        }
        tables.jobs.insert(record.id, record.clone());
        tracing::debug!(job_id = %record.id, "Job record created");
        Ok(record)
    }

    async fn get(&self, id: JobId) -> Result<Option<ConversionJob>, StoreError> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn update(&self, id: JobId, patch: JobPatch) -> Result<ConversionJob, StoreError> {
        let mut tables = self.inner.write().await;
        let job = tables.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.apply(patch);
        Ok(job.clone())
    }

    async fn delete(&self, id: JobId) -> Result<(), StoreError> {
        let mut tables = self.inner.write().await;
        tables.jobs.remove(&id);
        tables.listening.retain(|(_, job_id), _| *job_id != id);
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<JobWithProgress>, StoreError> {
        let tables = self.inner.read().await;
        let mut jobs: Vec<JobWithProgress> = tables
            .jobs
            .values()
            .filter(|j| j.owner == owner)
            .map(|j| JobWithProgress {
                job: j.clone(),
                listening_progress: tables.listening.get(&(owner.to_string(), j.id)).cloned(),
            })
            .collect();
        jobs.sort_by(|a, b| b.job.created_at.cmp(&a.job.created_at));
        Ok(jobs)
    }

    async fn save_listening_progress(
        &self,
        owner: &str,
        job_id: JobId,
        current_time: f64,
        completed: bool,
    ) -> Result<ListeningProgress, StoreError> {
        let mut tables = self.inner.write().await;
        if !tables.jobs.contains_key(&job_id) {
            return Err(StoreError::NotFound(job_id));
        }
        let progress = ListeningProgress {
            owner: owner.to_string(),
            job_id,
            current_time: current_time.max(0.0),
            completed,
            last_listened_at: Utc::now(),
        };
        tables
            .listening
            .insert((owner.to_string(), job_id), progress.clone());
        Ok(progress)
    }

    async fn listening_progress(
        &self,
        owner: &str,
        job_id: JobId,
    ) -> Result<Option<ListeningProgress>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .listening
            .get(&(owner.to_string(), job_id))
            .cloned())
    }
}
