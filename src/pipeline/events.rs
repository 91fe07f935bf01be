//! 进度事件与事件接收端
//!
//! 事件按发出顺序投递给监听方；接收端投递失败只在自身记录日志，绝不阻塞或影响流水线。

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// 事件种类（对应前端状态字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Processing,
    BriefingStart,
    BriefingComplete,
    ReportChunk,
    EditorComplete,
    Failed,
}

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Briefing,
    Editor,
}

/// 单条进度事件（可序列化为 JSON 推送给前端）
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub kind: ProgressKind,
    pub stage: Stage,
    pub message: String,
    /// 结构化负载：category、chunk、计数等
    pub payload: Value,
}

impl ProgressEvent {
    pub fn new(
        job_id: impl Into<String>,
        kind: ProgressKind,
        stage: Stage,
        message: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            stage,
            message: message.into(),
            payload,
        }
    }

    /// report_chunk 事件携带的文本
    pub fn chunk(&self) -> Option<&str> {
        if self.kind != ProgressKind::ReportChunk {
            return None;
        }
        self.payload.get("chunk").and_then(|v| v.as_str())
    }
}

/// 进度接收端：即发即忘
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, event: ProgressEvent);
}

/// 无监听方时使用
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl ProgressSink for NoopSink {
    async fn publish(&self, _event: ProgressEvent) {}
}

/// 只写日志（命令行运行时使用）
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl ProgressSink for LogSink {
    async fn publish(&self, event: ProgressEvent) {
        match event.kind {
            ProgressKind::ReportChunk => {
                tracing::debug!(job_id = %event.job_id, chunk = ?event.chunk(), "report chunk")
            }
            ProgressKind::Failed => {
                tracing::warn!(job_id = %event.job_id, stage = ?event.stage, "{}", event.message)
            }
            _ => tracing::info!(
                job_id = %event.job_id,
                kind = ?event.kind,
                stage = ?event.stage,
                payload = %event.payload,
                "{}",
                event.message
            ),
        }
    }
}

/// 广播给任意数量的订阅者（如 WebSocket 推送任务）；没有订阅者时事件直接丢弃
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<ProgressEvent>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ProgressSink for BroadcastSink {
    async fn publish(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!(job_id = %e.0.job_id, "progress event dropped: no subscribers");
        }
    }
}

/// 内存记录（测试与同步调用方读取完整事件序列）
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn of_kind(&self, kind: ProgressKind) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    /// 按顺序取出所有 report_chunk 文本
    pub fn chunks(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.chunk().map(String::from))
            .collect()
    }
}

#[async_trait]
impl ProgressSink for MemorySink {
    async fn publish(&self, event: ProgressEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(_) => tracing::warn!("progress recorder poisoned, event dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk_event(text: &str) -> ProgressEvent {
        ProgressEvent::new(
            "job",
            ProgressKind::ReportChunk,
            Stage::Editor,
            "Formatting final report",
            json!({ "chunk": text }),
        )
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_does_not_fail() {
        let (sink, rx) = BroadcastSink::new(8);
        drop(rx);
        sink.publish(chunk_event("x")).await;

        // 之后订阅的接收端只看到订阅后的事件
        let mut late = sink.subscribe();
        sink.publish(chunk_event("y")).await;
        assert_eq!(late.recv().await.unwrap().chunk(), Some("y"));
    }

    #[tokio::test]
    async fn test_broadcast_delivers_in_order() {
        let (sink, mut rx) = BroadcastSink::new(8);
        sink.publish(chunk_event("a")).await;
        sink.publish(chunk_event("b")).await;
        assert_eq!(rx.recv().await.unwrap().chunk(), Some("a"));
        assert_eq!(rx.recv().await.unwrap().chunk(), Some("b"));
    }

    #[test]
    fn test_event_serializes_snake_case_kind() {
        let value = serde_json::to_value(chunk_event("a")).unwrap();
        assert_eq!(value["kind"], "report_chunk");
        assert_eq!(value["payload"]["chunk"], "a");
    }
}
