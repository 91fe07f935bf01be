//! 文档集规范化
//!
//! 上游策划数据可能是「以 URL 为键的映射」或「无序列表」，字段也可能缺失或格式不一。
//! 这里统一转换为按评分降序（同分保持原顺序）的有序列表，截断过长正文，
//! 再按总字符预算贪心打包成可直接放进提示的文本块。

use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::config::PipelineSection;

/// 文档之间的分隔线
fn separator() -> String {
    format!("\n{}\n", "-".repeat(40))
}

/// 上游给出的原始文档；所有字段都可缺失
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// 抓取到的全文，优先于 content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    /// 评估结果，评分位于 evaluation.overall_score（数字或字符串）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Value>,
    /// 直接给出的评分（无 evaluation 时使用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Value>,
}

impl RawDocument {
    /// 评分：缺失或无法解析时为 0.0
    pub fn evaluation_score(&self) -> f64 {
        let value = self
            .evaluation
            .as_ref()
            .and_then(|e| e.get("overall_score"))
            .or(self.score.as_ref());
        let score = match value {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        score.filter(|s| s.is_finite()).unwrap_or(0.0)
    }

    fn body(&self) -> &str {
        self.raw_content
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.content.as_deref())
            .unwrap_or("")
    }

    /// 空白 url 视同缺失
    fn url_or(&self, fallback: impl FnOnce() -> String) -> String {
        self.url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(fallback)
    }
}

/// 一个分类的原始文档集合：映射或列表，保留原始插入顺序
#[derive(Debug, Clone, PartialEq)]
pub enum RawDocuments {
    Keyed(Vec<(String, RawDocument)>),
    List(Vec<RawDocument>),
}

impl Default for RawDocuments {
    fn default() -> Self {
        RawDocuments::List(Vec::new())
    }
}

impl RawDocuments {
    pub fn len(&self) -> usize {
        match self {
            RawDocuments::Keyed(items) => items.len(),
            RawDocuments::List(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for RawDocuments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RawDocuments::Keyed(items) => {
                let mut map = serializer.serialize_map(Some(items.len()))?;
                for (key, doc) in items {
                    map.serialize_entry(key, doc)?;
                }
                map.end()
            }
            RawDocuments::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for doc in items {
                    seq.serialize_element(doc)?;
                }
                seq.end()
            }
        }
    }
}

/// 单个元素格式错误时降级为空文档，而不是让整个输入反序列化失败
fn lenient_document(value: Value) -> RawDocument {
    serde_json::from_value(value).unwrap_or_default()
}

struct RawDocumentsVisitor;

impl<'de> Visitor<'de> for RawDocumentsVisitor {
    type Value = RawDocuments;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a list of documents or a map keyed by document url")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RawDocuments, A::Error> {
        let mut items = Vec::new();
        while let Some(value) = seq.next_element::<Value>()? {
            items.push(lenient_document(value));
        }
        Ok(RawDocuments::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawDocuments, A::Error> {
        let mut items = Vec::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            items.push((key, lenient_document(value)));
        }
        Ok(RawDocuments::Keyed(items))
    }

    fn visit_unit<E>(self) -> Result<RawDocuments, E> {
        Ok(RawDocuments::default())
    }
}

impl<'de> Deserialize<'de> for RawDocuments {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RawDocumentsVisitor)
    }
}

/// 规范化后的文档
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub url: String,
    pub title: String,
    pub content: String,
    pub evaluation_score: f64,
    pub truncated: bool,
}

impl Document {
    fn prompt_entry(&self) -> String {
        format!("Title: {}\n\nContent: {}", self.title, self.content)
    }
}

/// 打包上限
#[derive(Debug, Clone)]
pub struct PackLimits {
    pub max_doc_chars: usize,
    pub max_total_chars: usize,
    pub truncation_marker: String,
}

impl Default for PackLimits {
    fn default() -> Self {
        Self::from(&PipelineSection::default())
    }
}

impl From<&PipelineSection> for PackLimits {
    fn from(section: &PipelineSection) -> Self {
        Self {
            max_doc_chars: section.max_doc_chars,
            max_total_chars: section.max_total_chars,
            truncation_marker: section.truncation_marker.clone(),
        }
    }
}

/// 按评分降序排列的文档序列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentSet {
    documents: Vec<Document>,
}

/// 打包结果：提示文本块 + 收录/丢弃数量
#[derive(Debug, Clone, PartialEq)]
pub struct PackedDocuments {
    pub text: String,
    pub included: usize,
    pub dropped: usize,
}

impl DocumentSet {
    /// 规范化：映射取值（缺 url 时用键），列表缺 url 时用 `doc_<序号>`；
    /// 稳定降序排序后截断每篇正文
    pub fn normalize(raw: &RawDocuments, limits: &PackLimits) -> Self {
        let items: Vec<(String, &RawDocument)> = match raw {
            RawDocuments::Keyed(items) => items
                .iter()
                .map(|(key, doc)| (doc.url_or(|| key.clone()), doc))
                .collect(),
            RawDocuments::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, doc)| (doc.url_or(|| format!("doc_{}", i)), doc))
                .collect(),
        };

        let mut documents: Vec<Document> = items
            .into_iter()
            .map(|(url, doc)| {
                let (content, truncated) =
                    truncate_chars(doc.body(), limits.max_doc_chars, &limits.truncation_marker);
                Document {
                    url,
                    title: doc.title.clone().unwrap_or_default(),
                    content,
                    evaluation_score: doc.evaluation_score(),
                    truncated,
                }
            })
            .collect();

        // sort_by 是稳定排序：同分文档保持输入顺序
        documents.sort_by(|a, b| b.evaluation_score.total_cmp(&a.evaluation_score));

        Self { documents }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// 贪心打包：按优先级依次加入，累计长度必须严格小于预算；第一篇放不下的文档及其后全部丢弃
    pub fn pack(&self, limits: &PackLimits) -> PackedDocuments {
        let mut entries = Vec::new();
        let mut total = 0usize;
        for doc in &self.documents {
            let entry = doc.prompt_entry();
            let len = entry.chars().count();
            if total + len < limits.max_total_chars {
                total += len;
                entries.push(entry);
            } else {
                break;
            }
        }

        let sep = separator();
        let included = entries.len();
        PackedDocuments {
            text: format!("{}{}{}", sep, entries.join(&sep), sep),
            included,
            dropped: self.documents.len() - included,
        }
    }
}

/// 按字符截断并追加标记；返回 (文本, 是否截断)
fn truncate_chars(text: &str, max_chars: usize, marker: &str) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (format!("{}{}", &text[..byte_idx], marker), true),
        None => (text.to_string(), false),
    }
}
