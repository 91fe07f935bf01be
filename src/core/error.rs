//! 流水线错误类型
//!
//! 单个分类或单轮编辑的失败在本地降级，不会以 PipelineError 形式出现；
//! 这里只覆盖配置错误与任务边界上的存储错误。

use thiserror::Error;

use crate::core::ResearchState;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// 策划数据的键无法映射到固定分类（配置错误，不走通用模板）
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// 建档前的存储错误：流水线尚未开始
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// 流水线已经开始后的存储错误；已完成的状态（含报告）随错误一起交还
    #[error("Failed to persist job {}: {source}", .state.job_id)]
    Persist {
        state: Box<ResearchState>,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    /// 取回随错误交还的研究状态
    pub fn into_state(self) -> Option<ResearchState> {
        match self {
            PipelineError::Persist { state, .. } => Some(*state),
            _ => None,
        }
    }
}
