//! 任务与报告存储
//!
//! 以任务 ID 为键，保存任务输入、状态与最终报告。流水线只在任务边界上访问存储：
//! 开始时建档，结束时写状态与报告。内存实现用于测试与单次运行，JSON 文件实现用于跨进程查看结果。

pub mod json_file;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::JobStatus;
use crate::pipeline::references::Reference;

pub use json_file::JsonFileJobStore;
pub use memory::InMemoryJobStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already exists: {0}")]
    DuplicateJob(String),
}

/// 任务档案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    /// 调用方提交的原始输入
    pub inputs: Value,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: impl Into<String>, inputs: Value) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            inputs,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 应用一次更新；None 字段保持原值
    pub fn apply(&mut self, update: JobUpdate) {
        self.status = update.status;
        if update.result.is_some() {
            self.result = update.result;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        self.updated_at = Utc::now();
    }
}

/// 任务状态更新
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// 最终报告存档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub job_id: String,
    pub report_content: String,
    #[serde(default)]
    pub references: Vec<Reference>,
    /// 报告中的二级标题，按出现顺序
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub analyst_queries: BTreeMap<String, Vec<String>>,
    pub created_at: DateTime<Utc>,
}

/// 存储接口
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 建档；同一 job_id 重复建档返回 DuplicateJob
    async fn create_job(&self, job_id: &str, inputs: Value) -> Result<(), StoreError>;

    async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<(), StoreError>;

    /// 保存报告（同一任务再次保存时覆盖）
    async fn store_report(&self, report: ReportRecord) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;

    async fn get_report(&self, job_id: &str) -> Result<Option<ReportRecord>, StoreError>;
}
