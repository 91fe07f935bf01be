//! 参考文献格式化（纯函数）
//!
//! 按输入顺序逐条渲染为 MLA 风格的列表，固定以 `## References` 开头；不排序、不去重。

use serde::{Deserialize, Serialize};

pub const REFERENCES_HEADING: &str = "## References";

/// 引用元数据（作者、日期、站点）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceMeta {
    pub author: Option<String>,
    pub date: Option<String>,
    pub website: Option<String>,
}

impl ReferenceMeta {
    fn is_empty(&self) -> bool {
        self.author.is_none() && self.date.is_none() && self.website.is_none()
    }
}

/// 一条参考文献：URL + 可选标题与元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ReferenceRepr")]
pub struct Reference {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "ReferenceMeta::is_empty")]
    pub meta: ReferenceMeta,
}

impl Reference {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            meta: ReferenceMeta::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_meta(mut self, meta: ReferenceMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// 输入里的参考文献可以是裸 URL 字符串，也可以是完整对象
#[derive(Deserialize)]
#[serde(untagged)]
enum ReferenceRepr {
    Url(String),
    Full {
        url: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        meta: ReferenceMeta,
    },
}

impl From<ReferenceRepr> for Reference {
    fn from(repr: ReferenceRepr) -> Self {
        match repr {
            ReferenceRepr::Url(url) => Reference::new(url),
            ReferenceRepr::Full { url, title, meta } => Reference { url, title, meta },
        }
    }
}

/// 末尾已有句读时不再补句点
fn with_period(text: &str) -> String {
    if text.ends_with(&['.', '!', '?'][..]) {
        text.to_string()
    } else {
        format!("{}.", text)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// 单条：`* Author. "Title." Website, Date. URL`，缺失的部分直接省略
pub fn format_reference(reference: &Reference) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(author) = non_blank(&reference.meta.author) {
        parts.push(with_period(author));
    }
    if let Some(title) = non_blank(&reference.title) {
        parts.push(format!("\"{}\"", with_period(title)));
    }
    let source: Vec<&str> = [non_blank(&reference.meta.website), non_blank(&reference.meta.date)]
        .into_iter()
        .flatten()
        .collect();
    if !source.is_empty() {
        parts.push(with_period(&source.join(", ")));
    }
    parts.push(reference.url.trim().to_string());
    format!("* {}", parts.join(" "))
}

/// 完整参考文献块；列表为空时返回空串
pub fn format_references_section(references: &[Reference]) -> String {
    if references.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = references.iter().map(format_reference).collect();
    format!("{}\n\n{}", REFERENCES_HEADING, lines.join("\n"))
}
