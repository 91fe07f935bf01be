//! 核心类型：错误分类与研究状态

pub mod error;
pub mod state;

pub use error::PipelineError;
pub use state::{
    BriefingOutcome, Category, JobStatus, ResearchInput, ResearchState, Subject,
};
