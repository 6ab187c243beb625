//! Sample plugin process: drafts release notes and tags a release.
//!
//! Start it through `release-run`, which sets the launch cookie and reads the handshake.

use std::sync::Arc;

use async_trait::async_trait;
use stagehand_core::{Context, Operation, Operations, Plugin, PrepareError, Task, TaskError};
use stagehand_model::{GoalDescription, TaskDescription};
use stagehand_observe::{LoggerConfig, logger_init};
use stagehand_rpc::serve_plugin;
use stagehand_store::KvExt;
use tracing::info;

struct Changelog;

#[async_trait]
impl Task for Changelog {
    async fn check(&self, ctx: &Context) -> Result<(), TaskError> {
        if ctx.properties().get_string("release.version").is_empty() {
            return Err(TaskError::failed("release.version is not set"));
        }
        Ok(())
    }

    async fn run(&self, _ctx: &Context) -> Result<Operations, TaskError> {
        Ok(vec![Operation::new(20, |ctx: Context| async move {
            let version = ctx.properties().get_string("release.version");
            ctx.properties()
                .set_value("release.notes", format!("Changes in {version}"));
            info!(%version, "release notes drafted");
            Ok(())
        })])
    }
}

struct Tag;

#[async_trait]
impl Task for Tag {
    async fn run(&self, _ctx: &Context) -> Result<Operations, TaskError> {
        Ok(vec![Operation::new(50, |ctx: Context| async move {
            let tag = format!("v{}", ctx.properties().get_string("release.version"));
            ctx.properties().set_value("release.tag", tag.clone());
            ctx.for_cleanup(move |ctx: Context| async move {
                info!(%tag, "removing tag");
                ctx.properties().set_value("release.tag", "");
                Ok(())
            });
            Ok(())
        })])
    }

    async fn finish(&self, ctx: &Context) -> Result<(), TaskError> {
        info!(tag = %ctx.properties().get_string("release.tag"), "release tagged");
        Ok(())
    }
}

struct ReleasePlugin;

#[async_trait]
impl Plugin for ReleasePlugin {
    async fn implements(&self) -> Result<Vec<TaskDescription>, TaskError> {
        Ok(vec![
            TaskDescription::new(
                "release",
                "/release/changelog",
                "Draft release notes",
                Vec::<String>::new(),
            ),
            TaskDescription::new(
                "release",
                "/release",
                "Tag the release",
                vec!["/release/changelog"],
            ),
        ])
    }

    async fn goal(&self, name: &str) -> Result<GoalDescription, TaskError> {
        Err(TaskError::unsupported(name))
    }

    async fn prepare(&self, task: &str, _ctx: &Context) -> Result<Arc<dyn Task>, PrepareError> {
        match task {
            "/release/changelog" => Ok(Arc::new(Changelog)),
            "/release" => Ok(Arc::new(Tag)),
            _ => Err(TaskError::unsupported(task).into()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger_init(&LoggerConfig::plugin().with_env()?)?;
    serve_plugin(ReleasePlugin).await?;
    Ok(())
}
