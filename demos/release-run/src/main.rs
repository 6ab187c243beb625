//! Sample master: launches the plugins named in a config file and runs one task path.
//!
//! ```text
//! release-run <config.json> <task> [target]
//! ```
//!
//! Plugin commands must start quickly enough to answer the handshake, so build them first:
//! `cargo build -p release-plugin` before running against `demos/release.json`.

use std::sync::Arc;

use anyhow::Context as _;
use stagehand_core::{Config, Context, Plugin, run_with_requirements};
use stagehand_model::TaskPath;
use stagehand_observe::{LoggerConfig, logger_init};
use stagehand_rpc::PluginRegistry;
use stagehand_store::{Kv, MemoryKv};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger_init(&LoggerConfig::default().with_env()?)?;

    let mut args = std::env::args().skip(1);
    let (Some(config_path), Some(task)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: release-run <config.json> <task> [target]");
    };
    let target = args.next();

    let raw = tokio::fs::read_to_string(&config_path)
        .await
        .with_context(|| format!("reading {config_path}"))?;
    let config = Arc::new(Config::from_json(&raw).context("parsing config")?);
    let task = TaskPath::parse(&task)?;

    let mut registry = PluginRegistry::new();
    if let Err(e) = registry.launch_all(&config).await {
        registry.shutdown().await.ok();
        return Err(e.into());
    }
    let master = registry.master().with_config(Arc::clone(&config), target);

    let goal = master.goal(task.goal()).await?;
    info!(goal = %goal.name, short = %goal.short, "running");

    let ctx = Context::new(Arc::new(MemoryKv::new()));
    let result = run_with_requirements(&master, &task.to_string(), &ctx).await;
    let stopped = registry.shutdown().await;

    match result {
        Ok(()) => {
            for (key, value) in ctx.properties().all_settings() {
                info!(%key, value = %value.as_string(), "property");
            }
        }
        Err(e) => {
            error!(error = %e, "run failed");
            return Err(e.into());
        }
    }
    stopped?;
    Ok(())
}
