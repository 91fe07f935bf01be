//! 简报协调器：扇出 / 汇合
//!
//! 对每个有数据的分类 spawn 一个独立任务，各任务只拿自己的文档副本并返回自有结果；
//! 等待全部任务结束（不因单个失败提前退出）后，按分类枚举顺序统一写回状态。
//! 没有数据的分类直接记为空简报，不调用生成服务。

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::core::{BriefingOutcome, Category, JobStatus, ResearchState};
use crate::pipeline::briefing::{BriefingGenerator, BriefingResult};
use crate::pipeline::documents::DocumentSet;
use crate::pipeline::events::{ProgressEvent, ProgressKind, ProgressSink, Stage};

/// 每个分类在写回前的去向
enum Slot {
    NoData,
    Scheduled(usize),
}

pub struct BriefingCoordinator {
    generator: Arc<BriefingGenerator>,
    sink: Arc<dyn ProgressSink>,
}

impl BriefingCoordinator {
    pub fn new(generator: Arc<BriefingGenerator>, sink: Arc<dyn ProgressSink>) -> Self {
        Self { generator, sink }
    }

    /// 运行全部分类；本身从不失败，结果里任意子集的简报都可能为空
    pub async fn run(&self, mut state: ResearchState) -> ResearchState {
        let company = state.subject.company.clone();
        tracing::info!(job_id = %state.job_id, company = %company, "Creating section briefings");

        self.sink
            .publish(ProgressEvent::new(
                &state.job_id,
                ProgressKind::Processing,
                Stage::Briefing,
                "Starting research briefings",
                json!({ "step": "Briefing" }),
            ))
            .await;

        let mut summary = vec![format!("Creating section briefings for {}:", company)];
        let mut slots: Vec<(Category, Slot)> = Vec::with_capacity(Category::ALL.len());
        let mut handles: Vec<JoinHandle<BriefingResult>> = Vec::new();

        for category in Category::ALL {
            let documents = state
                .curated
                .get(&category)
                .filter(|raw| !raw.is_empty())
                .map(|raw| DocumentSet::normalize(raw, self.generator.limits()));

            match documents {
                Some(documents) => {
                    tracing::info!(category = %category, docs = documents.len(), "Processing curated data");
                    summary.push(format!(
                        "Processing {} ({} documents)...",
                        category.data_key(),
                        documents.len()
                    ));

                    let generator = Arc::clone(&self.generator);
                    let job_id = state.job_id.clone();
                    let subject = state.subject.clone();
                    slots.push((category, Slot::Scheduled(handles.len())));
                    handles.push(tokio::spawn(async move {
                        generator
                            .generate(&job_id, &documents, category, &subject)
                            .await
                    }));
                }
                None => {
                    summary.push(format!("No data available for {}", category.data_key()));
                    slots.push((category, Slot::NoData));
                }
            }
        }

        // 汇合屏障：所有任务都结束后才继续
        let mut results: Vec<Option<BriefingResult>> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(result) => Some(result),
                Err(e) => {
                    tracing::error!(error = %e, "briefing task aborted");
                    None
                }
            })
            .collect();

        let mut completed = 0usize;
        for (category, slot) in slots {
            let (content, outcome) = match slot {
                Slot::NoData => (String::new(), BriefingOutcome::NoData),
                Slot::Scheduled(index) => {
                    let content = results[index]
                        .take()
                        .map(|r| r.content)
                        .unwrap_or_default();
                    if content.is_empty() {
                        summary.push(format!(
                            "Failed to generate briefing for {}",
                            category.data_key()
                        ));
                        (content, BriefingOutcome::Failed)
                    } else {
                        let chars = content.chars().count();
                        summary.push(format!("Completed {} ({} characters)", category.data_key(), chars));
                        completed += 1;
                        (content, BriefingOutcome::Completed { chars })
                    }
                }
            };
            state.briefings.insert(category, content);
            state.outcomes.insert(category, outcome);
        }

        state.status = JobStatus::BriefingComplete;
        state.push_message(summary.join("\n"));

        self.sink
            .publish(ProgressEvent::new(
                &state.job_id,
                ProgressKind::Processing,
                Stage::Briefing,
                format!("Completed {} of {} briefings", completed, Category::ALL.len()),
                json!({ "step": "Briefing", "completed": completed }),
            ))
            .await;

        state
    }
}
