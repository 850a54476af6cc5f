use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use deedscout_common::Job;

use crate::traits::JobStore;

/// Keeps the newest snapshot of each job. A save older than the stored snapshot is
/// ignored, so out-of-order mirror writes never roll a job back.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| anyhow::anyhow!("MemoryJobStore lock poisoned"))?;
        match jobs.get(&job.id) {
            Some(existing) if existing.updated_at > job.updated_at => {}
            _ => {
                jobs.insert(job.id, job.clone());
            }
        }
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<Job>> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| anyhow::anyhow!("MemoryJobStore lock poisoned"))?;
        Ok(jobs.get(&job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use deedscout_common::JobStatus;

    #[tokio::test]
    async fn round_trips_and_ignores_stale_saves() {
        let store = MemoryJobStore::new();
        let mut job = Job::new(vec!["1 MAIN ST".into()]);
        store.save(&job).await.unwrap();

        let stale = job.clone();
        job.status = JobStatus::Processing;
        job.updated_at = job.updated_at + Duration::seconds(1);
        store.save(&job).await.unwrap();
        store.save(&stale).await.unwrap();

        let loaded = store.load(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }
}
