//! 报告流水线：文档归一化 → 分类简报（并发）→ 三轮编辑（流式）→ 存档

pub mod briefing;
pub mod coordinator;
pub mod documents;
pub mod editor;
pub mod events;
pub mod job;
pub mod references;
pub mod stream;

pub use briefing::{BriefingGenerator, BriefingResult};
pub use coordinator::BriefingCoordinator;
pub use documents::{DocumentSet, PackLimits, RawDocument, RawDocuments};
pub use editor::{report_sections, EditorOptions, ReportEditor};
pub use events::{BroadcastSink, LogSink, MemorySink, NoopSink, ProgressEvent, ProgressKind, ProgressSink, Stage};
pub use job::ResearchJob;
pub use references::{format_references_section, Reference, ReferenceMeta};
pub use stream::{BufferState, ChunkBuffer};
