//! 内存存储（进程退出即丢失）

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{JobRecord, JobStore, JobUpdate, ReportRecord, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
    reports: RwLock<HashMap<String, ReportRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job_id: &str, inputs: Value) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(job_id) {
            return Err(StoreError::DuplicateJob(job_id.to_string()));
        }
        jobs.insert(job_id.to_string(), JobRecord::new(job_id, inputs));
        Ok(())
    }

    async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        job.apply(update);
        Ok(())
    }

    async fn store_report(&self, report: ReportRecord) -> Result<(), StoreError> {
        self.reports
            .write()
            .await
            .insert(report.job_id.clone(), report);
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn get_report(&self, job_id: &str) -> Result<Option<ReportRecord>, StoreError> {
        Ok(self.reports.read().await.get(job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_update_get() {
        let store = InMemoryJobStore::new();
        store.create_job("j1", json!({"company": "Acme"})).await.unwrap();
        assert!(matches!(
            store.create_job("j1", json!({})).await,
            Err(StoreError::DuplicateJob(_))
        ));

        store
            .update_job("j1", JobUpdate::status(JobStatus::Processing))
            .await
            .unwrap();
        store
            .update_job("j1", JobUpdate::status(JobStatus::Failed).with_error("no report"))
            .await
            .unwrap();

        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("no report"));
        assert_eq!(job.inputs["company"], "Acme");
        assert!(job.updated_at >= job.created_at);
        assert_eq!(store.job_count().await, 1);
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let store = InMemoryJobStore::new();
        let err = store
            .update_job("missing", JobUpdate::status(JobStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound(id) if id == "missing"));
        assert!(store.get_report("missing").await.unwrap().is_none());
    }
}
