//! Dossier 命令行入口
//!
//! 用法：`dossier <input.json> [config.toml]`
//! 读取研究输入，跑完整条流水线，把最终报告打印到标准输出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use dossier::config::load_config;
use dossier::pipeline::{LogSink, ProgressSink, ResearchJob};
use dossier::store::{InMemoryJobStore, JobStore, JsonFileJobStore};
use dossier::{JobStatus, PipelineError, ResearchInput};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dossier::observability::init();

    let mut args = std::env::args().skip(1);
    let input_path = args
        .next()
        .map(PathBuf::from)
        .context("usage: dossier <input.json> [config.toml]")?;
    let config_path = args.next().map(PathBuf::from);

    let cfg = load_config(config_path).context("Failed to load config")?;

    let raw = tokio::fs::read_to_string(&input_path)
        .await
        .with_context(|| format!("Failed to read {}", input_path.display()))?;
    let input: ResearchInput = serde_json::from_str(&raw).context("Invalid research input")?;

    let store: Arc<dyn JobStore> = match &cfg.store.path {
        Some(path) => Arc::new(
            JsonFileJobStore::open(path)
                .await
                .with_context(|| format!("Failed to open job store {}", path.display()))?,
        ),
        None => Arc::new(InMemoryJobStore::new()),
    };
    let sink: Arc<dyn ProgressSink> = Arc::new(LogSink);

    let job = ResearchJob::from_config(&cfg, store, sink);
    let state = match job.run_input(input).await {
        Ok(state) => state,
        // 报告已生成但存档失败：照常输出，错误只记日志
        Err(PipelineError::Persist { state, source }) => {
            tracing::error!(error = %source, "Research job result was not persisted");
            *state
        }
        Err(e) => return Err(e).context("Research job failed"),
    };

    tracing::info!(job_id = %state.job_id, status = state.status.as_str(), "Done");
    if state.status == JobStatus::Failed {
        anyhow::bail!("No report produced for {}", state.subject.company);
    }
    println!("{}", state.report);
    Ok(())
}
