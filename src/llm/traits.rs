//! 生成服务抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式片段）。
//! 流的自然结束即结束标记；流中途出现 Err 表示中断，已收到的片段由调用方自行处理。

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use thiserror::Error;

use crate::llm::Message;

/// 生成服务错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Empty response")]
    EmptyResponse,

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),
}

/// 流式片段序列
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成（返回片段流）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 流式完成，返回片段流
    async fn complete_stream(&self, messages: &[Message]) -> Result<TextStream, LlmError>;

    /// 后端名称（日志用）
    fn name(&self) -> &str {
        "llm"
    }
}

/// 给片段流加上空闲超时：两个片段之间超过 idle 即产出 Timeout 并结束流。
/// 流中的第一个 Err 之后同样结束，不再轮询底层连接。
pub fn with_idle_timeout(inner: TextStream, idle: Duration) -> TextStream {
    Box::pin(stream::unfold(Some(inner), move |pending| async move {
        let mut inner: TextStream = match pending {
            Some(inner) => inner,
            None => return None,
        };
        match tokio::time::timeout(idle, inner.next()).await {
            Ok(Some(Ok(fragment))) => Some((Ok(fragment), Some(inner))),
            Ok(Some(Err(e))) => Some((Err(e), None)),
            Ok(None) => None,
            Err(_) => {
                tracing::warn!(idle_secs = idle.as_secs_f64(), "stream stalled, giving up");
                Some((Err(LlmError::Timeout(idle.as_secs())), None))
            }
        }
    }))
}
