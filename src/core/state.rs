//! 研究状态：贯穿整个任务的共享记录
//!
//! 由调用方按任务创建一次，流水线运行期间独占持有，完成或失败后原样交还。
//! 并发的简报任务不直接写它：各自返回结果，由协调器在汇合后按分类枚举顺序统一写回。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::PipelineError;
use crate::pipeline::documents::RawDocuments;
use crate::pipeline::references::Reference;

/// 固定的简报分类；声明顺序即写回顺序与报告章节顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Company,
    Industry,
    Financial,
    News,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Company,
        Category::Industry,
        Category::Financial,
        Category::News,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Company => "company",
            Category::Industry => "industry",
            Category::Financial => "financial",
            Category::News => "news",
        }
    }

    /// 策划数据字段名，如 `financial_data`
    pub fn data_key(&self) -> &'static str {
        match self {
            Category::Company => "company_data",
            Category::Industry => "industry_data",
            Category::Financial => "financial_data",
            Category::News => "news_data",
        }
    }

    /// 报告中对应的二级标题
    pub fn section_title(&self) -> &'static str {
        match self {
            Category::Company => "Company Overview",
            Category::Industry => "Industry Overview",
            Category::Financial => "Financial Overview",
            Category::News => "News",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = PipelineError;

    /// 接受 `news`、`news_data` 与 `curated_news_data` 三种写法；其余一律视为配置错误
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let key = lowered.strip_prefix("curated_").unwrap_or(&lowered);
        let key = key.strip_suffix("_data").unwrap_or(key);
        match key {
            "company" => Ok(Category::Company),
            "industry" => Ok(Category::Industry),
            "financial" => Ok(Category::Financial),
            "news" => Ok(Category::News),
            _ => Err(PipelineError::UnknownCategory(s.to_string())),
        }
    }
}

/// 研究对象
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub company: String,
    #[serde(default = "unknown")]
    pub industry: String,
    #[serde(default = "unknown")]
    pub hq_location: String,
}

fn unknown() -> String {
    "Unknown".to_string()
}

impl Subject {
    pub fn new(company: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            industry: unknown(),
            hq_location: unknown(),
        }
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = industry.into();
        self
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    BriefingComplete,
    /// 四个章节都有内容
    Completed,
    /// 产出了报告，但部分分类没有简报
    CompletedWithMissingSections,
    /// 没有产出任何报告
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::BriefingComplete => "briefing_complete",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithMissingSections => "completed_with_missing_sections",
            JobStatus::Failed => "failed",
        }
    }
}

/// 单个分类的简报结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BriefingOutcome {
    /// 没有输入文档，未调用生成服务
    NoData,
    /// 生成失败或返回空白
    Failed,
    Completed { chars: usize },
}

/// 调用方提交的研究输入（策划数据的键为字符串，解析成分类时校验）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchInput {
    #[serde(default)]
    pub job_id: Option<String>,
    pub subject: Subject,
    #[serde(default)]
    pub curated: BTreeMap<String, RawDocuments>,
    #[serde(default)]
    pub references: Vec<Reference>,
    /// 上游分析师使用过的检索词，随报告原样存档
    #[serde(default)]
    pub queries: BTreeMap<String, Vec<String>>,
}

/// 研究状态
#[derive(Debug, Clone)]
pub struct ResearchState {
    pub job_id: String,
    pub subject: Subject,
    /// 分类 -> 策划文档
    pub curated: BTreeMap<Category, RawDocuments>,
    /// 分类 -> 简报正文（空串表示无数据或生成失败）
    pub briefings: BTreeMap<Category, String>,
    pub outcomes: BTreeMap<Category, BriefingOutcome>,
    pub references: Vec<Reference>,
    pub queries: BTreeMap<String, Vec<String>>,
    pub report: String,
    pub status: JobStatus,
    /// 只追加的进度日志
    pub messages: Vec<String>,
}

impl ResearchState {
    pub fn new(job_id: impl Into<String>, subject: Subject) -> Self {
        Self {
            job_id: job_id.into(),
            subject,
            curated: BTreeMap::new(),
            briefings: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            references: Vec::new(),
            queries: BTreeMap::new(),
            report: String::new(),
            status: JobStatus::Pending,
            messages: Vec::new(),
        }
    }

    /// 从输入构造；策划数据里出现无法识别的分类键时返回 UnknownCategory
    pub fn from_input(input: ResearchInput) -> Result<Self, PipelineError> {
        let job_id = input
            .job_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut state = Self::new(job_id, input.subject);
        for (key, docs) in input.curated {
            let category: Category = key.parse()?;
            state.curated.insert(category, docs);
        }
        state.references = input.references;
        state.queries = input.queries;
        Ok(state)
    }

    pub fn with_curated(mut self, category: Category, docs: RawDocuments) -> Self {
        self.curated.insert(category, docs);
        self
    }

    pub fn push_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_variants() {
        assert_eq!("news".parse::<Category>().unwrap(), Category::News);
        assert_eq!("financial_data".parse::<Category>().unwrap(), Category::Financial);
        assert_eq!("curated_company_data".parse::<Category>().unwrap(), Category::Company);
        assert!(matches!(
            "weather_data".parse::<Category>(),
            Err(PipelineError::UnknownCategory(k)) if k == "weather_data"
        ));
    }

    #[test]
    fn test_category_order_matches_report_sections() {
        let titles: Vec<_> = Category::ALL.iter().map(|c| c.section_title()).collect();
        assert_eq!(
            titles,
            vec!["Company Overview", "Industry Overview", "Financial Overview", "News"]
        );
        let mut sorted = Category::ALL.to_vec();
        sorted.reverse();
        sorted.sort();
        assert_eq!(sorted, Category::ALL.to_vec());
    }

    #[test]
    fn test_from_input_rejects_unknown_key() {
        let input: ResearchInput = serde_json::from_str(
            r#"{"subject": {"company": "Acme"}, "curated": {"company_data": [], "misc": []}}"#,
        )
        .unwrap();
        assert!(ResearchState::from_input(input).is_err());
    }

    #[test]
    fn test_from_input_defaults() {
        let input: ResearchInput = serde_json::from_str(
            r#"{"job_id": "j1", "subject": {"company": "Acme"}, "curated": {"news_data": [{"title": "t"}]}, "references": ["https://a"]}"#,
        )
        .unwrap();
        let state = ResearchState::from_input(input).unwrap();
        assert_eq!(state.job_id, "j1");
        assert_eq!(state.subject.industry, "Unknown");
        assert_eq!(state.curated[&Category::News].len(), 1);
        assert_eq!(state.references.len(), 1);
        assert_eq!(state.status, JobStatus::Pending);
    }
}
