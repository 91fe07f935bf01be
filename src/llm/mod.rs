//! LLM 层：生成服务抽象与实现（OpenAI 兼容端点，含 DeepSeek；Mock）
//!
//! 简报阶段与编辑阶段各持有一个独立的客户端实例，可分别配置后端与模型。

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use message::{role_prompt, Message, Role};
pub use mock::{MockLlmClient, MockReply};
pub use openai::OpenAiClient;
pub use traits::{with_idle_timeout, LlmClient, LlmError, TextStream};

use crate::config::AppConfig;

/// DeepSeek 的 OpenAI 兼容端点
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// 使用生成服务的流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmStage {
    Briefing,
    Editor,
}

/// 根据配置与环境变量为某一阶段创建客户端；无可用 Key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig, stage: LlmStage) -> Arc<dyn LlmClient> {
    let stage_cfg = match stage {
        LlmStage::Briefing => &cfg.llm.briefing,
        LlmStage::Editor => &cfg.llm.editor,
    };
    let provider = stage_cfg
        .provider
        .clone()
        .unwrap_or_else(|| cfg.llm.provider.clone())
        .to_lowercase();
    let timeouts = &cfg.llm.timeouts;

    if provider == "mock" {
        tracing::info!(?stage, "Using Mock LLM");
        return Arc::new(MockLlmClient::new());
    }

    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = provider == "deepseek"
        && (std::env::var("DEEPSEEK_API_KEY").is_ok() || std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = provider == "openai" && std::env::var("OPENAI_API_KEY").is_ok();

    if use_deepseek {
        let model = stage_cfg
            .model
            .clone()
            .or_else(|| cfg.llm.deepseek.model.clone())
            .unwrap_or_else(|| cfg.llm.model.clone());
        let api_key = std::env::var("DEEPSEEK_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();
        let base_url = cfg.llm.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);
        tracing::info!(?stage, "Using DeepSeek LLM ({})", model);
        Arc::new(
            OpenAiClient::new(Some(base_url), &model, api_key.as_deref())
                .with_timeouts(timeouts.request, timeouts.stream),
        )
    } else if use_openai {
        let model = stage_cfg
            .model
            .clone()
            .or_else(|| cfg.llm.openai.model.clone())
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!(?stage, "Using OpenAI LLM ({})", model);
        Arc::new(
            OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            )
            .with_timeouts(timeouts.request, timeouts.stream),
        )
    } else {
        tracing::warn!(?stage, provider = %provider, "No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_provider_override() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        assert_eq!(create_llm_from_config(&cfg, LlmStage::Briefing).name(), "mock");

        cfg.llm.provider = "no-such-backend".to_string();
        cfg.llm.editor.provider = Some("MOCK".to_string());
        assert_eq!(create_llm_from_config(&cfg, LlmStage::Editor).name(), "mock");
    }
}
