//! JSON 文件存储
//!
//! 整个存储是一个 JSON 文件（jobs + reports 两张表），每次写操作后整体重写；
//! 父目录不存在时自动创建。改动先落在副本上，写盘成功后才替换内存中的数据，
//! 写盘失败时内存与文件保持一致。适合单进程、低频写入的命令行场景。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;

use super::{JobRecord, JobStore, JobUpdate, ReportRecord, StoreError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    jobs: BTreeMap<String, JobRecord>,
    #[serde(default)]
    reports: BTreeMap<String, ReportRecord>,
}

#[derive(Debug)]
pub struct JsonFileJobStore {
    path: PathBuf,
    data: Mutex<StoreFile>,
}

impl JsonFileJobStore {
    /// 打开存储文件；文件不存在时从空存储开始
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = match fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => StoreFile::default(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), jobs = data.jobs.len(), "job store opened");
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    async fn save(&self, data: &StoreFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(data)?).await?;
        Ok(())
    }

    /// 在副本上应用改动并写盘，成功后才提交到内存
    async fn commit<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoreFile) -> Result<(), StoreError> + Send,
    {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        change(&mut next)?;
        self.save(&next).await?;
        *data = next;
        Ok(())
    }
}

#[async_trait]
impl JobStore for JsonFileJobStore {
    async fn create_job(&self, job_id: &str, inputs: Value) -> Result<(), StoreError> {
        self.commit(|data| {
            if data.jobs.contains_key(job_id) {
                return Err(StoreError::DuplicateJob(job_id.to_string()));
            }
            data.jobs
                .insert(job_id.to_string(), JobRecord::new(job_id, inputs));
            Ok(())
        })
        .await
    }

    async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<(), StoreError> {
        self.commit(|data| {
            data.jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?
                .apply(update);
            Ok(())
        })
        .await
    }

    async fn store_report(&self, report: ReportRecord) -> Result<(), StoreError> {
        self.commit(|data| {
            data.reports.insert(report.job_id.clone(), report);
            Ok(())
        })
        .await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.data.lock().await.jobs.get(job_id).cloned())
    }

    async fn get_report(&self, job_id: &str) -> Result<Option<ReportRecord>, StoreError> {
        Ok(self.data.lock().await.reports.get(job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobStatus;
    use crate::pipeline::references::Reference;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_reopen_sees_previous_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.json");

        let store = JsonFileJobStore::open(&path).await.unwrap();
        store.create_job("j1", json!({"company": "Acme"})).await.unwrap();
        store
            .update_job(
                "j1",
                JobUpdate::status(JobStatus::Completed).with_result(json!({"sections": 5})),
            )
            .await
            .unwrap();
        store
            .store_report(ReportRecord {
                job_id: "j1".into(),
                report_content: "# Acme Research Report".into(),
                references: vec![Reference::new("https://acme.example")],
                sections: vec!["News".into()],
                analyst_queries: Default::default(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        drop(store);

        let reopened = JsonFileJobStore::open(&path).await.unwrap();
        let job = reopened.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"sections": 5})));
        let report = reopened.get_report("j1").await.unwrap().unwrap();
        assert_eq!(report.references[0].url, "https://acme.example");
        assert!(matches!(
            reopened.create_job("j1", json!({})).await,
            Err(StoreError::DuplicateJob(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = JsonFileJobStore::open(&path).await.unwrap();

        // 目标路径被目录占用，写盘必然失败
        std::fs::create_dir(&path).unwrap();
        assert!(matches!(
            store.create_job("j1", json!({})).await,
            Err(StoreError::Io(_))
        ));
        assert!(store.get_job("j1").await.unwrap().is_none());

        std::fs::remove_dir(&path).unwrap();
        store.create_job("j1", json!({})).await.unwrap();
        assert!(store.get_job("j1").await.unwrap().is_some());

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        assert!(store
            .update_job("j1", JobUpdate::status(JobStatus::Completed))
            .await
            .is_err());
        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonFileJobStore::open(&path).await,
            Err(StoreError::Serde(_))
        ));
    }
}
