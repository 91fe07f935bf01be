//! Dossier - 公司研究报告流水线
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 研究状态、分类、任务状态与错误类型
//! - **llm**: 生成服务抽象与实现（OpenAI 兼容 / DeepSeek / Mock），支持流式输出
//! - **observability**: 日志初始化
//! - **pipeline**: 文档归一化、并发简报、三轮编辑、参考文献与进度事件
//! - **store**: 任务与报告存储（内存 / JSON 文件）

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod store;

pub use crate::core::{Category, JobStatus, PipelineError, ResearchInput, ResearchState, Subject};
pub use crate::pipeline::ResearchJob;
