//! 研究任务：在存储的任务边界之间串起简报协调器与报告编辑器
//!
//! 建档 → processing → 简报（扇出/汇合）→ briefing_complete → 编辑 → 终态 + 报告存档。
//! 简报与编辑内部的失败都已在各自节点降级，这里只会因存储错误返回 Err。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::core::{JobStatus, PipelineError, ResearchInput, ResearchState, Subject};
use crate::llm::{create_llm_from_config, LlmStage};
use crate::pipeline::briefing::BriefingGenerator;
use crate::pipeline::coordinator::BriefingCoordinator;
use crate::pipeline::documents::{PackLimits, RawDocuments};
use crate::pipeline::editor::{report_sections, EditorOptions, ReportEditor};
use crate::pipeline::events::ProgressSink;
use crate::pipeline::references::Reference;
use crate::store::{JobStore, JobUpdate, ReportRecord, StoreError};

/// 建档时保存的输入快照
#[derive(Serialize)]
struct JobInputs<'a> {
    subject: &'a Subject,
    curated: BTreeMap<&'static str, &'a RawDocuments>,
    references: &'a [Reference],
    queries: &'a BTreeMap<String, Vec<String>>,
}

impl<'a> JobInputs<'a> {
    fn of(state: &'a ResearchState) -> Self {
        Self {
            subject: &state.subject,
            curated: state
                .curated
                .iter()
                .map(|(c, docs)| (c.data_key(), docs))
                .collect(),
            references: &state.references,
            queries: &state.queries,
        }
    }
}

pub struct ResearchJob {
    store: Arc<dyn JobStore>,
    coordinator: BriefingCoordinator,
    editor: ReportEditor,
}

impl ResearchJob {
    pub fn new(store: Arc<dyn JobStore>, coordinator: BriefingCoordinator, editor: ReportEditor) -> Self {
        Self {
            store,
            coordinator,
            editor,
        }
    }

    /// 按配置为简报阶段与编辑阶段分别创建生成服务
    pub fn from_config(cfg: &AppConfig, store: Arc<dyn JobStore>, sink: Arc<dyn ProgressSink>) -> Self {
        let generator = Arc::new(BriefingGenerator::new(
            create_llm_from_config(cfg, LlmStage::Briefing),
            Arc::clone(&sink),
            PackLimits::from(&cfg.pipeline),
        ));
        let coordinator = BriefingCoordinator::new(generator, Arc::clone(&sink));
        let editor = ReportEditor::new(
            create_llm_from_config(cfg, LlmStage::Editor),
            sink,
            EditorOptions::from(&cfg.pipeline),
        );
        Self::new(store, coordinator, editor)
    }

    /// 从调用方输入开始；未知分类键在建档前就拒绝
    pub async fn run_input(&self, input: ResearchInput) -> Result<ResearchState, PipelineError> {
        let state = ResearchState::from_input(input)?;
        self.run(state).await
    }

    /// 建档失败时直接返回 Store 错误；此后的存储错误返回 Persist，并带回已完成的状态
    pub async fn run(&self, mut state: ResearchState) -> Result<ResearchState, PipelineError> {
        let job_id = state.job_id.clone();
        let inputs = serde_json::to_value(JobInputs::of(&state)).map_err(StoreError::from)?;
        self.store.create_job(&job_id, inputs).await?;
        tracing::info!(job_id = %job_id, company = %state.subject.company, "Research job created");

        state.status = JobStatus::Processing;
        if let Err(e) = self
            .store
            .update_job(&job_id, JobUpdate::status(JobStatus::Processing))
            .await
        {
            return Err(self.abandon(state, e).await);
        }

        let state = self.coordinator.run(state).await;
        if let Err(e) = self
            .store
            .update_job(&job_id, JobUpdate::status(state.status))
            .await
        {
            return Err(self.abandon(state, e).await);
        }

        let state = self.editor.run(state).await;
        match self.record_outcome(&state).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, status = state.status.as_str(), "Research job finished");
                Ok(state)
            }
            Err(e) => Err(self.abandon(state, e).await),
        }
    }

    /// 写终态；有报告时先存档报告
    async fn record_outcome(&self, state: &ResearchState) -> Result<(), StoreError> {
        if state.status == JobStatus::Failed {
            tracing::error!(job_id = %state.job_id, "Research job produced no report");
            return self
                .store
                .update_job(
                    &state.job_id,
                    JobUpdate::status(JobStatus::Failed)
                        .with_error("No briefing content available to compile a report"),
                )
                .await;
        }

        let sections = report_sections(&state.report);
        self.store
            .store_report(ReportRecord {
                job_id: state.job_id.clone(),
                report_content: state.report.clone(),
                references: state.references.clone(),
                sections: sections.clone(),
                analyst_queries: state.queries.clone(),
                created_at: Utc::now(),
            })
            .await?;
        self.store
            .update_job(
                &state.job_id,
                JobUpdate::status(state.status).with_result(json!({
                    "report_chars": state.report.chars().count(),
                    "sections": sections,
                    "outcomes": state.outcomes,
                })),
            )
            .await
    }

    /// 存储出错：尽力把任务标记为 failed，状态随错误交还调用方
    async fn abandon(&self, state: ResearchState, source: StoreError) -> PipelineError {
        tracing::error!(job_id = %state.job_id, error = %source, "Job store write failed");
        let update = JobUpdate::status(JobStatus::Failed).with_error(format!("Store error: {}", source));
        if let Err(e) = self.store.update_job(&state.job_id, update).await {
            tracing::warn!(job_id = %state.job_id, error = %e, "Could not mark job as failed");
        }
        PipelineError::Persist {
            state: Box::new(state),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Category;
    use crate::llm::{MockLlmClient, MockReply};
    use crate::pipeline::documents::RawDocument;
    use crate::pipeline::events::NoopSink;
    use crate::store::{InMemoryJobStore, JobRecord};

    fn job(llm: Arc<MockLlmClient>, store: Arc<dyn JobStore>) -> ResearchJob {
        let sink: Arc<dyn ProgressSink> = Arc::new(NoopSink);
        let generator = Arc::new(BriefingGenerator::new(llm.clone(), sink.clone(), PackLimits::default()));
        ResearchJob::new(
            store,
            BriefingCoordinator::new(generator, sink.clone()),
            ReportEditor::new(llm, sink, EditorOptions::default()),
        )
    }

    fn news_llm() -> Arc<MockLlmClient> {
        Arc::new(
            MockLlmClient::new()
                .on("You are compiling", MockReply::Text("## News\n* launch".into()))
                .on("redundant", MockReply::Text("## News\n* launch".into()))
                .on("Critical rules", MockReply::Fragments(vec!["# Acme Research Report\n".into(), "## News\n* launch".into()]))
                .otherwise(MockReply::Text("* launch".into())),
        )
    }

    fn news_docs() -> RawDocuments {
        RawDocuments::List(vec![RawDocument {
            title: Some("Launch".into()),
            content: Some("Acme launched".into()),
            ..Default::default()
        }])
    }

    /// 报告写入总是失败，其余操作委托给内存存储
    struct ReportWriteFails(InMemoryJobStore);

    #[async_trait::async_trait]
    impl JobStore for ReportWriteFails {
        async fn create_job(&self, job_id: &str, inputs: serde_json::Value) -> Result<(), StoreError> {
            self.0.create_job(job_id, inputs).await
        }

        async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<(), StoreError> {
            self.0.update_job(job_id, update).await
        }

        async fn store_report(&self, _report: ReportRecord) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }

        async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
            self.0.get_job(job_id).await
        }

        async fn get_report(&self, job_id: &str) -> Result<Option<ReportRecord>, StoreError> {
            self.0.get_report(job_id).await
        }
    }

    #[tokio::test]
    async fn test_report_write_failure_returns_state_and_fails_job() {
        let llm = news_llm();
        let store = Arc::new(ReportWriteFails(InMemoryJobStore::new()));
        let state = ResearchState::new("j-disk", Subject::new("Acme")).with_curated(Category::News, news_docs());

        let err = job(llm.clone(), store.clone()).run(state).await.unwrap_err();

        assert!(matches!(&err, PipelineError::Persist { source: StoreError::Io(_), .. }));
        assert_eq!(llm.call_count(), 4);
        let record = store.get_job("j-disk").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().contains("disk full"));

        let state = err.into_state().unwrap();
        assert_eq!(state.report, "# Acme Research Report\n## News\n* launch");
        assert_eq!(state.status, JobStatus::CompletedWithMissingSections);
    }

    #[tokio::test]
    async fn test_job_without_documents_is_failed_in_store() {
        let llm = Arc::new(MockLlmClient::new());
        let store = Arc::new(InMemoryJobStore::new());
        let state = ResearchState::new("j-empty", Subject::new("Acme"));

        let state = job(llm.clone(), store.clone()).run(state).await.unwrap();

        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(llm.call_count(), 0);
        let record = store.get_job("j-empty").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.is_some());
        assert!(store.get_report("j-empty").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_job_stores_report_with_missing_sections() {
        let llm = news_llm();
        let store = Arc::new(InMemoryJobStore::new());
        let docs = news_docs();
        let mut queries = BTreeMap::new();
        queries.insert("news".to_string(), vec!["acme launch".to_string()]);
        let mut state = ResearchState::new("j-part", Subject::new("Acme")).with_curated(Category::News, docs);
        state.queries = queries.clone();

        let state = job(llm, store.clone()).run(state).await.unwrap();

        assert_eq!(state.status, JobStatus::CompletedWithMissingSections);
        let report = store.get_report("j-part").await.unwrap().unwrap();
        assert_eq!(report.report_content, state.report);
        assert_eq!(report.sections, vec!["News".to_string()]);
        assert_eq!(report.analyst_queries, queries);
        let record = store.get_job("j-part").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::CompletedWithMissingSections);
        assert_eq!(record.inputs["curated"]["news_data"][0]["title"], "Launch");
    }

    #[tokio::test]
    async fn test_duplicate_job_id_is_rejected() {
        let store = Arc::new(InMemoryJobStore::new());
        store.create_job("dup", json!({})).await.unwrap();
        let llm = Arc::new(MockLlmClient::new());

        let err = job(llm.clone(), store)
            .run(ResearchState::new("dup", Subject::new("Acme")))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Store(StoreError::DuplicateJob(_))));
        assert_eq!(llm.call_count(), 0);
    }
}
