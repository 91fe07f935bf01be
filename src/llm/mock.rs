//! Mock LLM 客户端（用于测试与无 API Key 时的本地运行）
//!
//! 按规则匹配提示内容（子串），返回预设文本、片段流或错误；可为每条规则设置延迟，
//! 用于模拟乱序完成。未命中任何规则时回显 user 提示首行。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, Message, Role, TextStream};

/// 预设回复
#[derive(Debug, Clone)]
pub enum MockReply {
    /// 完整文本（流式时作为单个片段）
    Text(String),
    /// 片段序列（非流式时拼接返回）
    Fragments(Vec<String>),
    /// 直接失败
    Fail(LlmError),
    /// 先输出若干片段，再以错误中断
    FailMidStream(Vec<String>, LlmError),
}

#[derive(Debug, Clone)]
struct MockRule {
    pattern: String,
    reply: MockReply,
    delay: Option<Duration>,
}

/// Mock 客户端：规则表 + 调用记录
#[derive(Debug, Default)]
pub struct MockLlmClient {
    rules: Vec<MockRule>,
    fallback: Option<MockReply>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提示中包含 pattern 时返回 reply（先注册的规则优先）
    pub fn on(mut self, pattern: impl Into<String>, reply: MockReply) -> Self {
        self.rules.push(MockRule {
            pattern: pattern.into(),
            reply,
            delay: None,
        });
        self
    }

    /// 同 on，但返回前先等待 delay
    pub fn on_delayed(mut self, pattern: impl Into<String>, reply: MockReply, delay: Duration) -> Self {
        self.rules.push(MockRule {
            pattern: pattern.into(),
            reply,
            delay: Some(delay),
        });
        self
    }

    /// 未命中规则时的回复
    pub fn otherwise(mut self, reply: MockReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// 所有请求都失败
    pub fn failing(error: LlmError) -> Self {
        Self::new().otherwise(MockReply::Fail(error))
    }

    /// 已记录的调用（每次调用的完整消息列表）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 提示中包含 needle 的调用次数
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|msgs| msgs.iter().any(|m| m.content.contains(needle)))
            .count()
    }

    async fn resolve(&self, messages: &[Message]) -> MockReply {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        let rule = self
            .rules
            .iter()
            .find(|r| messages.iter().any(|m| m.content.contains(&r.pattern)))
            .cloned();

        match rule {
            Some(rule) => {
                if let Some(delay) = rule.delay {
                    tokio::time::sleep(delay).await;
                }
                rule.reply
            }
            None => self.fallback.clone().unwrap_or_else(|| {
                let first_line = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .and_then(|m| m.content.lines().find(|l| !l.trim().is_empty()))
                    .unwrap_or("(no input)");
                MockReply::Text(format!("Echo from Mock: {}", first_line.trim()))
            }),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        match self.resolve(messages).await {
            MockReply::Text(text) => Ok(text),
            MockReply::Fragments(parts) => Ok(parts.concat()),
            MockReply::Fail(e) | MockReply::FailMidStream(_, e) => Err(e),
        }
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TextStream, LlmError> {
        let items: Vec<Result<String, LlmError>> = match self.resolve(messages).await {
            MockReply::Text(text) => vec![Ok(text)],
            MockReply::Fragments(parts) => parts.into_iter().map(Ok).collect(),
            MockReply::Fail(e) => return Err(e),
            MockReply::FailMidStream(parts, e) => parts
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(e)))
                .collect(),
        };
        Ok(Box::pin(stream::iter(items)))
    }
}
