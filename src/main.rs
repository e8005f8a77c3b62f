//! waggle - 阶段式智能体编排内核
//!
//! 入口：初始化日志、加载配置、构建编排器，运行一次查询并把每个事件打印为一行 JSON。
//! Ctrl+C 触发取消；以 error 事件结束时返回非零退出码。

use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use waggle::config::load_config;
use waggle::core::SessionSupervisor;
use waggle::{agent::build_orchestrator, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        anyhow::bail!("usage: waggle \"<query>\"");
    }

    let cfg = load_config(std::env::var("WAGGLE_CONFIG").ok().map(Into::into))
        .context("Failed to load config")?;
    let orchestrator = build_orchestrator(&cfg)?;

    let supervisor = SessionSupervisor::new();
    let ctrl_c = supervisor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl+C received, cancelling");
            ctrl_c.cancel();
        }
    });

    let token = match cfg.agent.query_timeout_secs {
        Some(secs) => supervisor.child_token_with_deadline(Duration::from_secs(secs)),
        None => supervisor.child_token(),
    };
    let mut run = orchestrator.run(query, token);
    let mut failed = false;
    while let Some(event) = run.next().await {
        println!("{}", serde_json::to_string(&event).context("Failed to serialize event")?);
        if event.is_terminal() {
            failed = event.kind() == "error";
            break;
        }
    }
    let report = run.report().await.context("Query task panicked")?;
    tracing::info!(final_phase = %report.final_phase, iterations = report.iterations, "query finished");

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
