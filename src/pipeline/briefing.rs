//! 分类简报生成
//!
//! 每个分类一套固定指令（要求的标题、只用要点、只写可核实事实），拼上打包好的文档文本，
//! 调用一次生成服务（非流式）。任何错误或空白回复都在本地吞掉，返回空内容。

use std::sync::Arc;

use serde_json::json;

use crate::core::{Category, Subject};
use crate::llm::{role_prompt, LlmClient, LlmError};
use crate::pipeline::documents::{DocumentSet, PackLimits};
use crate::pipeline::events::{ProgressEvent, ProgressKind, ProgressSink, Stage};

const BRIEFING_SYSTEM_ROLE: &str =
    "You are an expert research analyst that writes concise, factual company briefings.";

/// 单个分类的生成结果；content 为空表示失败或无输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BriefingResult {
    pub category: Category,
    pub content: String,
}

impl BriefingResult {
    pub fn empty(category: Category) -> Self {
        Self {
            category,
            content: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

fn company_template(subject: &Subject) -> String {
    let company = &subject.company;
    format!(
        r#"Create a focused company briefing for {company}.
Key requirements:
1. Start with: "{company} is a [what] that [does what] for [whom]"
2. Structure using these exact headers and bullet points:

Core Product/Service
• List distinct products/features
• Include only verified technical capabilities

Target Market
• List specific target audiences
• List verified use cases
• List confirmed customers/partners

Key Differentiators
• List unique features
• List proven advantages

Business Model
• Discuss product / service pricing
• List distribution channels

3. Each bullet must be a single, complete fact
4. No paragraphs, only bullet points
5. No explanations or commentary."#
    )
}

fn industry_template(subject: &Subject) -> String {
    let company = &subject.company;
    format!(
        r#"Analyze {company}'s market position in the {industry} industry.
Key requirements:
1. Structure using these exact headers and bullet points:

Market Overview
• State {company}'s exact market segment
• List market size with year
• List growth rate with year range

Direct Competition
• List named direct competitors
• List specific competing products
• List market positions

Competitive Advantages
• List unique technical features
• List proven advantages

Market Challenges
• List specific verified challenges

2. Each bullet must be a single, complete fact
3. No paragraphs, only bullet points
4. No explanations or commentary."#,
        industry = subject.industry
    )
}

fn financial_template(subject: &Subject) -> String {
    let company = &subject.company;
    format!(
        r#"List {company}'s financial data.
Key requirements:
1. Structure using these headers and bullet points:

Funding & Investment
• Total funding amount with date
• List each funding round with date
• List named investors

Revenue Model
• Discuss product / service pricing if applicable

2. Include specific numbers when possible
3. No paragraphs, only bullet points
4. Never provide explanations or commentary."#
    )
}

fn news_template(subject: &Subject) -> String {
    let company = &subject.company;
    format!(
        r#"List verified {company} news.
Key requirements:
1. Structure into these categories:
   - Major Announcements
     • Product / service launches
     • New initiatives

   - Partnerships
     • Integrations
     • Collaborations

   - Recognition
     • Awards
     • Press coverage

2. Sort newest to oldest
3. One event per bullet point
4. Never provide explanations or commentary like "Here is the news...""#
    )
}

/// 分类 -> 指令；穷尽匹配，不存在通用兜底模板
pub fn category_instruction(category: Category, subject: &Subject) -> String {
    match category {
        Category::Company => company_template(subject),
        Category::Industry => industry_template(subject),
        Category::Financial => financial_template(subject),
        Category::News => news_template(subject),
    }
}

/// 完整提示：分类指令 + 打包文档 + 收尾约束
pub fn build_briefing_prompt(category: Category, subject: &Subject, packed_documents: &str) -> String {
    format!(
        r#"{}

Analyze the following documents and extract key information:

{}

Create a concise briefing with factual, verifiable information without introductions or conclusions. Never provide explanations or additional commentary. Never say "Okay here is..." or anything like that. Just provide the briefing."#,
        category_instruction(category, subject),
        packed_documents
    )
}

/// 简报生成器：持有简报阶段的生成服务与进度接收端
pub struct BriefingGenerator {
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn ProgressSink>,
    limits: PackLimits,
}

impl BriefingGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, sink: Arc<dyn ProgressSink>, limits: PackLimits) -> Self {
        Self { llm, sink, limits }
    }

    pub fn limits(&self) -> &PackLimits {
        &self.limits
    }

    /// 生成一个分类的简报；失败返回空内容，不向上传播
    pub async fn generate(
        &self,
        job_id: &str,
        documents: &DocumentSet,
        category: Category,
        subject: &Subject,
    ) -> BriefingResult {
        tracing::info!(
            category = %category,
            company = %subject.company,
            docs = documents.len(),
            "Generating briefing"
        );

        self.sink
            .publish(ProgressEvent::new(
                job_id,
                ProgressKind::BriefingStart,
                Stage::Briefing,
                format!("Generating {} briefing", category),
                json!({
                    "step": "Briefing",
                    "category": category.as_str(),
                    "total_docs": documents.len(),
                }),
            ))
            .await;

        let packed = documents.pack(&self.limits);
        if packed.dropped > 0 {
            tracing::debug!(
                category = %category,
                included = packed.included,
                dropped = packed.dropped,
                "documents dropped by prompt budget"
            );
        }
        let prompt = build_briefing_prompt(category, subject, &packed.text);

        let content = match self.llm.complete(&role_prompt(BRIEFING_SYSTEM_ROLE, &prompt)).await {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    Err(LlmError::EmptyResponse)
                } else {
                    Ok(text.to_string())
                }
            }
            Err(e) => Err(e),
        };

        match content {
            Ok(content) => {
                self.sink
                    .publish(ProgressEvent::new(
                        job_id,
                        ProgressKind::BriefingComplete,
                        Stage::Briefing,
                        format!("Completed {} briefing", category),
                        json!({
                            "step": "Briefing",
                            "category": category.as_str(),
                            "chars": content.chars().count(),
                        }),
                    ))
                    .await;
                BriefingResult { category, content }
            }
            Err(e) => {
                tracing::error!(category = %category, error = %e, "Error generating briefing");
                self.sink
                    .publish(ProgressEvent::new(
                        job_id,
                        ProgressKind::BriefingComplete,
                        Stage::Briefing,
                        format!("Failed to generate {} briefing", category),
                        json!({
                            "step": "Briefing",
                            "category": category.as_str(),
                            "chars": 0,
                            "error": e.to_string(),
                        }),
                    ))
                    .await;
                BriefingResult::empty(category)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, MockReply};
    use crate::pipeline::documents::{RawDocument, RawDocuments};
    use crate::pipeline::events::MemorySink;

    fn docs() -> DocumentSet {
        let raw = RawDocuments::List(vec![RawDocument {
            title: Some("Acme raises".into()),
            content: Some("Acme raised $10M in 2024.".into()),
            ..Default::default()
        }]);
        DocumentSet::normalize(&raw, &PackLimits::default())
    }

    #[test]
    fn test_templates_are_distinct_per_category() {
        let subject = Subject::new("Acme").with_industry("Robotics");
        let prompts: Vec<String> = Category::ALL
            .iter()
            .map(|c| category_instruction(*c, &subject))
            .collect();
        assert!(prompts[0].contains("Core Product/Service"));
        assert!(prompts[1].contains("Robotics"));
        assert!(prompts[2].contains("Funding & Investment"));
        assert!(prompts[3].contains("Sort newest to oldest"));
    }

    #[tokio::test]
    async fn test_generate_trims_and_emits_events() {
        let llm = Arc::new(MockLlmClient::new().otherwise(MockReply::Text("  • fact\n".into())));
        let sink = Arc::new(MemorySink::new());
        let gen = BriefingGenerator::new(llm.clone(), sink.clone(), PackLimits::default());

        let result = gen
            .generate("job-1", &docs(), Category::Financial, &Subject::new("Acme"))
            .await;

        assert_eq!(result.content, "• fact");
        assert_eq!(llm.calls_containing("Acme raised $10M"), 1);
        let kinds: Vec<_> = sink.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ProgressKind::BriefingStart, ProgressKind::BriefingComplete]);
    }

    #[tokio::test]
    async fn test_generate_swallows_errors_and_blank_replies() {
        let sink = Arc::new(MemorySink::new());
        let failing = BriefingGenerator::new(
            Arc::new(MockLlmClient::failing(LlmError::Request("boom".into()))),
            sink.clone(),
            PackLimits::default(),
        );
        let result = failing
            .generate("job-1", &docs(), Category::News, &Subject::new("Acme"))
            .await;
        assert!(result.is_empty());

        let blank = BriefingGenerator::new(
            Arc::new(MockLlmClient::new().otherwise(MockReply::Text("  \n ".into()))),
            sink,
            PackLimits::default(),
        );
        let result = blank
            .generate("job-1", &docs(), Category::News, &Subject::new("Acme"))
            .await;
        assert!(result.is_empty());
    }
}
