//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DOSSIER__*` 覆盖（双下划线表示嵌套，如 `DOSSIER__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择、分阶段模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmModelSection,
    #[serde(default)]
    pub openai: LlmModelSection,
    /// 简报阶段使用的生成服务（与编辑阶段相互独立）
    #[serde(default)]
    pub briefing: LlmStageSection,
    /// 编辑阶段使用的生成服务
    #[serde(default)]
    pub editor: LlmStageSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmModelSection::default(),
            openai: LlmModelSection::default(),
            briefing: LlmStageSection::default(),
            editor: LlmStageSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelSection {
    pub model: Option<String>,
}

/// [llm.briefing] / [llm.editor]：覆盖 provider 与 model
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmStageSection {
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
            stream: default_stream_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

fn default_stream_timeout() -> u64 {
    120
}

/// [pipeline] 段：文档打包上限、流式刷新阈值、是否启用清理轮
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// 单篇文档内容最大字符数，超出截断并追加标记
    #[serde(default = "default_max_doc_chars")]
    pub max_doc_chars: usize,
    /// 一次简报提示中文档总字符预算
    #[serde(default = "default_max_total_chars")]
    pub max_total_chars: usize,
    #[serde(default = "default_truncation_marker")]
    pub truncation_marker: String,
    /// 格式化轮流式输出时，缓冲区遇到句/行边界且不短于该值才推送
    #[serde(default = "default_min_flush_chars")]
    pub min_flush_chars: usize,
    /// 关闭后跳过去重清理轮（降级配置）
    #[serde(default = "default_sweep_enabled")]
    pub sweep_enabled: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_doc_chars: default_max_doc_chars(),
            max_total_chars: default_max_total_chars(),
            truncation_marker: default_truncation_marker(),
            min_flush_chars: default_min_flush_chars(),
            sweep_enabled: default_sweep_enabled(),
        }
    }
}

fn default_max_doc_chars() -> usize {
    8000
}

fn default_max_total_chars() -> usize {
    120_000
}

fn default_truncation_marker() -> String {
    "... [content truncated]".to_string()
}

fn default_min_flush_chars() -> usize {
    10
}

fn default_sweep_enabled() -> bool {
    true
}

/// [store] 段：任务/报告存储位置，未设置时只存内存
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreSection {
    pub path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 DOSSIER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DOSSIER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DOSSIER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.pipeline.max_doc_chars, 8000);
        assert_eq!(cfg.pipeline.max_total_chars, 120_000);
        assert!(cfg.pipeline.sweep_enabled);
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert_eq!(cfg.llm.provider, "deepseek");
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[pipeline]\nmin_flush_chars = 5\nsweep_enabled = false\n\n[llm.editor]\nmodel = \"gpt-4o\"\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.pipeline.min_flush_chars, 5);
        assert!(!cfg.pipeline.sweep_enabled);
        assert_eq!(cfg.pipeline.max_doc_chars, 8000);
        assert_eq!(cfg.llm.editor.model.as_deref(), Some("gpt-4o"));
    }
}
