//! 报告编辑器：编译 → 清理 → 格式化 三轮
//!
//! 每轮一次完整的生成调用。编译轮与格式化轮必跑，清理轮可在降级配置下跳过；
//! 任何一轮失败都原样传递上一轮文本。格式化轮走流式接口，按句/行边界分段推送 report_chunk，
//! 同时累积出完整文本作为返回值（即使没有任何监听方）。

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;

use crate::config::PipelineSection;
use crate::core::{BriefingOutcome, Category, JobStatus, ResearchState, Subject};
use crate::llm::{role_prompt, LlmClient, LlmError};
use crate::pipeline::events::{ProgressEvent, ProgressKind, ProgressSink, Stage};
use crate::pipeline::references::{format_references_section, Reference, REFERENCES_HEADING};
use crate::pipeline::stream::ChunkBuffer;

const COMPILE_SYSTEM_ROLE: &str =
    "You are an expert report editor that compiles research briefings into comprehensive company reports.";
const SWEEP_SYSTEM_ROLE: &str =
    "You are an expert report editor that removes redundancy and improves clarity.";
const FORMAT_SYSTEM_ROLE: &str =
    "You are an expert markdown formatter that ensures consistent document structure.";

/// 编辑器选项
#[derive(Debug, Clone)]
pub struct EditorOptions {
    /// false 时跳过清理轮
    pub sweep_enabled: bool,
    /// 流式推送的最小长度
    pub min_flush_chars: usize,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self::from(&PipelineSection::default())
    }
}

impl From<&PipelineSection> for EditorOptions {
    fn from(section: &PipelineSection) -> Self {
        Self {
            sweep_enabled: section.sweep_enabled,
            min_flush_chars: section.min_flush_chars,
        }
    }
}

/// 报告标题行
pub fn report_title(subject: &Subject) -> String {
    format!("# {} Research Report", subject.company)
}

/// 报告中的二级标题（不含 `## `），按出现顺序
pub fn report_sections(report: &str) -> Vec<String> {
    report
        .lines()
        .filter_map(|line| line.strip_prefix("## "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .collect()
}

fn section_skeleton(with_references: bool) -> String {
    let mut out: Vec<String> = Category::ALL
        .iter()
        .map(|c| {
            let label = c.section_title().split(' ').next().unwrap_or_default();
            format!("## {}\n[{} content with ### subsections]", c.section_title(), label)
        })
        .collect();
    if with_references {
        out.push(format!(
            "{}\n[References in MLA format - PRESERVE EXACTLY AS PROVIDED]",
            REFERENCES_HEADING
        ));
    }
    out.join("\n\n")
}

fn compile_prompt(subject: &Subject, combined: &str) -> String {
    format!(
        r#"You are compiling a comprehensive research report about {company}.

Compiled briefings:
{combined}

Create a comprehensive and focused report on {company}, a {industry} company headquartered in {hq} that:
1. Integrates information from all sections into a cohesive non-repetitive narrative
2. Maintains important details from each section
3. Logically organizes information and removes transitional commentary / explanations
4. Uses clear section headers and structure

Formatting rules:
Strictly enforce this EXACT document structure:

{title}

{skeleton}

Return the report in clean markdown format. No explanations or commentary."#,
        company = subject.company,
        industry = subject.industry,
        hq = subject.hq_location,
        title = report_title(subject),
        skeleton = section_skeleton(false),
    )
}

fn sweep_prompt(subject: &Subject, content: &str) -> String {
    format!(
        r#"You are an expert briefing editor. You are given a report on {company}.

Current report:
{content}

1. Remove redundant or repetitive information
2. Remove information that is not relevant to {company}, the {industry} company headquartered in {hq}.
3. Remove sections lacking substantial content
4. Remove any meta-commentary (e.g. "Here is the news...")

Strictly enforce this EXACT document structure:

{title}

{skeleton}

The References section must be copied character for character, unchanged.

Return the cleaned report in markdown format. No explanations or commentary."#,
        company = subject.company,
        industry = subject.industry,
        hq = subject.hq_location,
        title = report_title(subject),
        skeleton = section_skeleton(true),
    )
}

fn format_prompt(subject: &Subject, content: &str) -> String {
    let headers: Vec<String> = Category::ALL
        .iter()
        .map(|c| format!("   - ## {}", c.section_title()))
        .chain(std::iter::once(format!("   - {}", REFERENCES_HEADING)))
        .collect();
    format!(
        r#"You are given a research report on {company}.

Current report:
{content}

Critical rules:
1. The document MUST start with "{title}"
2. The document MUST ONLY use these exact ## headers in this order:
{headers}
3. NO OTHER ## HEADERS ARE ALLOWED
4. Use ### for subsections in Company/Industry/Financial sections
5. News section should only use bullet points (*), never headers
6. Never use code blocks (```)
7. Never use more than one blank line between sections
8. Format all bullet points with *
9. Add one blank line before and after each section/list
10. DO NOT CHANGE the format of the references section

Return the polished report in flawless markdown format. No explanations or commentary."#,
        company = subject.company,
        title = report_title(subject),
        headers = headers.join("\n"),
    )
}

pub struct ReportEditor {
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn ProgressSink>,
    options: EditorOptions,
}

impl ReportEditor {
    pub fn new(llm: Arc<dyn LlmClient>, sink: Arc<dyn ProgressSink>, options: EditorOptions) -> Self {
        Self { llm, sink, options }
    }

    async fn publish(&self, job_id: &str, kind: ProgressKind, message: &str, payload: serde_json::Value) {
        self.sink
            .publish(ProgressEvent::new(job_id, kind, Stage::Editor, message, payload))
            .await;
    }

    async fn substep(&self, job_id: &str, message: &str, substep: &str) {
        self.publish(
            job_id,
            ProgressKind::Processing,
            message,
            json!({ "step": "Editor", "substep": substep }),
        )
        .await;
    }

    /// 汇总非空简报并跑完三轮，返回最终报告；没有任何简报时返回空串
    pub async fn compile(&self, state: &mut ResearchState) -> String {
        let company = state.subject.company.clone();
        let job_id = state.job_id.clone();

        self.substep(&job_id, &format!("Starting report compilation for {}", company), "initialization")
            .await;

        let mut msg = vec![format!("Compiling final report for {}...", company)];
        self.substep(&job_id, "Collecting section briefings", "collecting_briefings")
            .await;

        let mut briefings: Vec<(Category, String)> = Vec::new();
        for category in Category::ALL {
            match state.briefings.get(&category).filter(|b| !b.trim().is_empty()) {
                Some(content) => {
                    msg.push(format!(
                        "Found {} briefing ({} characters)",
                        category,
                        content.chars().count()
                    ));
                    briefings.push((category, content.clone()));
                }
                None => {
                    msg.push(format!("No {} briefing available", category));
                    tracing::warn!(job_id = %job_id, category = %category, "Missing briefing");
                }
            }
        }

        let report = if briefings.is_empty() {
            msg.push("No briefing sections available to compile".to_string());
            tracing::error!(job_id = %job_id, "No briefings found in state");
            String::new()
        } else {
            let report = self
                .edit_report(&job_id, &state.subject, &briefings, &state.references)
                .await;
            tracing::info!(job_id = %job_id, chars = report.chars().count(), "Final report compiled");
            report
        };

        state.push_message(msg.join("\n"));
        report
    }

    /// 编辑器节点：写回报告并据此给出任务状态
    pub async fn run(&self, mut state: ResearchState) -> ResearchState {
        let report = self.compile(&mut state).await;
        state.status = if report.trim().is_empty() {
            JobStatus::Failed
        } else if state
            .outcomes
            .values()
            .all(|o| matches!(o, BriefingOutcome::Completed { .. }))
            && state.outcomes.len() == Category::ALL.len()
        {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithMissingSections
        };
        state.report = report;

        if state.status == JobStatus::Failed {
            self.publish(
                &state.job_id,
                ProgressKind::Failed,
                "No report produced",
                json!({ "step": "Editor", "status": state.status.as_str() }),
            )
            .await;
        } else {
            self.publish(
                &state.job_id,
                ProgressKind::EditorComplete,
                "Research report completed",
                json!({
                    "step": "Editor",
                    "report": state.report,
                    "company": state.subject.company,
                    "is_final": true,
                    "status": state.status.as_str(),
                }),
            )
            .await;
        }
        state
    }

    async fn edit_report(
        &self,
        job_id: &str,
        subject: &Subject,
        briefings: &[(Category, String)],
        references: &[Reference],
    ) -> String {
        self.substep(job_id, "Compiling initial research report", "compilation")
            .await;
        let compiled = self.compile_pass(subject, briefings, references).await;

        let swept = if self.options.sweep_enabled {
            self.substep(job_id, "Cleaning up and organizing report", "cleanup")
                .await;
            self.sweep_pass(subject, &compiled).await
        } else {
            tracing::info!(job_id = %job_id, "Sweep pass disabled, skipping");
            compiled
        };

        self.substep(job_id, "Formatting final report", "format").await;
        self.format_pass(job_id, subject, &swept).await
    }

    /// 第一轮：合并简报；参考文献块在模型输出之后原样追加。
    /// 失败时退回简报原文拼接。
    async fn compile_pass(
        &self,
        subject: &Subject,
        briefings: &[(Category, String)],
        references: &[Reference],
    ) -> String {
        let combined = briefings
            .iter()
            .map(|(_, content)| content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let reference_text = format_references_section(references);
        if !reference_text.is_empty() {
            tracing::info!(count = references.len(), "Adding references during compilation");
        }

        let prompt = compile_prompt(subject, &combined);
        match non_blank(self.llm.complete(&role_prompt(COMPILE_SYSTEM_ROLE, &prompt)).await) {
            Ok(report) if reference_text.is_empty() => report,
            Ok(report) => format!("{}\n\n{}", report, reference_text),
            Err(e) => {
                tracing::error!(error = %e, "Error in initial compilation, using raw briefings");
                combined.trim().to_string()
            }
        }
    }

    /// 第二轮：去冗余、去无关内容、去元评论
    async fn sweep_pass(&self, subject: &Subject, content: &str) -> String {
        let prompt = sweep_prompt(subject, content);
        match non_blank(self.llm.complete(&role_prompt(SWEEP_SYSTEM_ROLE, &prompt)).await) {
            Ok(swept) => swept,
            Err(e) => {
                tracing::warn!(error = %e, "Sweep pass failed, keeping compiled report");
                content.to_string()
            }
        }
    }

    /// 第三轮：严格格式化，流式推送
    async fn format_pass(&self, job_id: &str, subject: &Subject, content: &str) -> String {
        let prompt = format_prompt(subject, content);
        let mut stream = match self
            .llm
            .complete_stream(&role_prompt(FORMAT_SYSTEM_ROLE, &prompt))
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Error in formatting, keeping previous report");
                return content.trim().to_string();
            }
        };

        let mut buffer = ChunkBuffer::new(self.options.min_flush_chars);
        let mut interrupted: Option<LlmError> = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    if let Some(chunk) = buffer.push(&fragment) {
                        self.publish_chunk(job_id, chunk).await;
                    }
                }
                Err(e) => {
                    interrupted = Some(e);
                    break;
                }
            }
        }
        if let Some(tail) = buffer.finish() {
            self.publish_chunk(job_id, tail).await;
        }

        let formatted = buffer.into_accumulated();
        if let Some(e) = interrupted {
            tracing::error!(
                error = %e,
                partial_chars = formatted.chars().count(),
                "Format stream interrupted, keeping previous report"
            );
            return content.trim().to_string();
        }
        if formatted.trim().is_empty() {
            tracing::warn!("Format pass returned nothing, keeping previous report");
            return content.trim().to_string();
        }
        formatted.trim().to_string()
    }

    async fn publish_chunk(&self, job_id: &str, chunk: String) {
        self.publish(
            job_id,
            ProgressKind::ReportChunk,
            "Formatting final report",
            json!({ "step": "Editor", "chunk": chunk }),
        )
        .await;
    }
}

fn non_blank(result: Result<String, LlmError>) -> Result<String, LlmError> {
    let text = result?;
    let text = text.trim();
    if text.is_empty() {
        Err(LlmError::EmptyResponse)
    } else {
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, MockReply};
    use crate::pipeline::events::MemorySink;

    fn state_with(briefings: &[(Category, &str)]) -> ResearchState {
        let mut state = ResearchState::new("job-9", Subject::new("Acme").with_industry("Robotics"));
        for (c, text) in briefings {
            state.briefings.insert(*c, text.to_string());
        }
        state
    }

    fn editor(llm: Arc<MockLlmClient>, sink: Arc<MemorySink>, sweep: bool) -> ReportEditor {
        ReportEditor::new(
            llm,
            sink,
            EditorOptions {
                sweep_enabled: sweep,
                min_flush_chars: 5,
            },
        )
    }

    #[test]
    fn test_report_sections() {
        let report = "# Acme Research Report\n\n## Company Overview\n### Core\n## News\n* x\n##\n## References\n";
        assert_eq!(report_sections(report), vec!["Company Overview", "News", "References"]);
    }

    #[test]
    fn test_prompts_carry_fixed_structure() {
        let subject = Subject::new("Acme");
        let p = format_prompt(&subject, "body");
        assert!(p.contains("# Acme Research Report"));
        let order: Vec<usize> = ["## Company Overview", "## Industry Overview", "## Financial Overview", "## News", "## References"]
            .iter()
            .map(|h| p.find(h).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
        assert!(compile_prompt(&subject, "b").contains("[Company content with ### subsections]"));
    }

    #[tokio::test]
    async fn test_no_briefings_yields_empty_report_and_failure() {
        let llm = Arc::new(MockLlmClient::new());
        let sink = Arc::new(MemorySink::new());
        let state = state_with(&[(Category::News, "   ")]);

        let state = editor(llm.clone(), sink.clone(), true).run(state).await;

        assert_eq!(state.report, "");
        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(llm.call_count(), 0);
        assert_eq!(sink.of_kind(ProgressKind::Failed).len(), 1);
        assert!(state.messages.last().unwrap().contains("No briefing sections available"));
    }

    #[tokio::test]
    async fn test_compile_failure_falls_back_to_raw_briefings() {
        let llm = Arc::new(MockLlmClient::failing(LlmError::Request("down".into())));
        let sink = Arc::new(MemorySink::new());
        let mut state = state_with(&[(Category::Company, "• alpha"), (Category::News, "• omega")]);

        let report = editor(llm.clone(), sink, true).compile(&mut state).await;

        assert_eq!(report, "• alpha\n\n• omega");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_sweep_skipped_when_disabled() {
        let llm = Arc::new(
            MockLlmClient::new()
                .on("You are compiling", MockReply::Text("COMPILED".into()))
                .on("redundant", MockReply::Text("SWEPT".into()))
                .on("Critical rules", MockReply::Fragments(vec!["FORMATTED".into()])),
        );
        let sink = Arc::new(MemorySink::new());
        let mut state = state_with(&[(Category::Company, "• alpha")]);

        let report = editor(llm.clone(), sink, false).compile(&mut state).await;

        assert_eq!(report, "FORMATTED");
        assert_eq!(llm.call_count(), 2);
        assert_eq!(llm.calls_containing("SWEPT"), 0);
        assert_eq!(llm.calls_containing("COMPILED"), 1);
    }

    #[tokio::test]
    async fn test_format_stream_chunks_and_buffered_result() {
        let llm = Arc::new(
            MockLlmClient::new()
                .on("You are compiling", MockReply::Text("COMPILED".into()))
                .on("redundant", MockReply::Text("SWEPT".into()))
                .on(
                    "Critical rules",
                    MockReply::Fragments(vec![
                        "Hel".into(),
                        "lo, wor".into(),
                        "ld.\n".into(),
                        "Next section".into(),
                    ]),
                ),
        );
        let sink = Arc::new(MemorySink::new());
        let mut state = state_with(&[(Category::Company, "• alpha")]);

        let report = editor(llm.clone(), sink.clone(), true).compile(&mut state).await;

        let chunks = sink.chunks();
        assert_eq!(chunks, vec!["Hello, world.\n".to_string(), "Next section".to_string()]);
        assert_eq!(chunks.concat(), "Hello, world.\nNext section");
        assert_eq!(report, "Hello, world.\nNext section");
        assert_eq!(llm.calls_containing("SWEPT"), 1);
    }

    #[tokio::test]
    async fn test_interrupted_format_stream_keeps_previous_text() {
        let llm = Arc::new(
            MockLlmClient::new()
                .on("You are compiling", MockReply::Text("COMPILED".into()))
                .on("redundant", MockReply::Text("SWEPT".into()))
                .on(
                    "Critical rules",
                    MockReply::FailMidStream(vec!["Partial.\n".into()], LlmError::Stream("reset".into())),
                ),
        );
        let sink = Arc::new(MemorySink::new());
        let mut state = state_with(&[(Category::Company, "• alpha")]);

        let report = editor(llm, sink.clone(), true).compile(&mut state).await;

        assert_eq!(report, "SWEPT");
        assert_eq!(sink.chunks(), vec!["Partial.\n".to_string()]);
    }
}
