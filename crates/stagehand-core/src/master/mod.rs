mod composite;
pub use composite::{CompositeTask, Member};

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use stagehand_model::{GoalDescription, TaskDescription, TaskPath, builtin_goals};
use stagehand_store::Kv;
use tracing::{debug, info, instrument, trace};

use crate::{
    concurrency::{BoxFuture, fan_out, partition, run_concurrently},
    config::Config,
    context::Context,
    error::{AggregateError, TaskError},
    plugin::{Plugin, PrepareError},
    task::Task,
};

type Prepared = (String, Context, Result<Arc<dyn Task>, PrepareError>);

/// Aggregates every registered plugin behind the [`Plugin`] contract.
///
/// Preparing a task asks every enabled plugin for an instance and wraps the ones that
/// implement it into a [`CompositeTask`].
#[derive(Default)]
pub struct Master {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
    config: Option<Arc<Config>>,
    target: Option<String>,
}

impl Master {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer per-plugin configuration under each member context and honour the
    /// enabled/disabled plugin lists.
    pub fn with_config(mut self, config: Arc<Config>, target: Option<String>) -> Self {
        self.config = Some(config);
        self.target = target;
        self
    }

    #[inline]
    pub fn register(&mut self, name: impl Into<String>, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(name.into(), plugin);
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    fn member_base(&self, path: &TaskPath, plugin: &str) -> Result<Option<Arc<dyn Kv>>, TaskError> {
        let Some(cfg) = &self.config else {
            return Ok(None);
        };
        let kv = cfg.to_kv(path, self.target.as_deref(), Some(plugin))?;
        Ok(Some(Arc::new(kv)))
    }

    fn enabled(&self, path: &TaskPath, plugin: &str) -> bool {
        self.config
            .as_ref()
            .is_none_or(|cfg| cfg.plugin_enabled(path, plugin))
    }
}

#[async_trait]
impl Plugin for Master {
    #[instrument(level = "debug", skip(self))]
    async fn implements(&self) -> Result<Vec<TaskDescription>, TaskError> {
        let units = self
            .plugins
            .iter()
            .map(|(name, plugin)| -> BoxFuture<Result<Vec<TaskDescription>, TaskError>> {
                let name = name.clone();
                let plugin = Arc::clone(plugin);
                Box::pin(async move { plugin.implements().await.map_err(|e| e.for_member(&name)) })
            })
            .collect();

        let (lists, errors) = partition(fan_out(units).await);
        errors.into_result()?;

        let mut all: Vec<TaskDescription> = lists.into_iter().flatten().collect();
        all.sort_by(|a, b| (&a.name, &a.plugin).cmp(&(&b.name, &b.plugin)));
        Ok(all)
    }

    #[instrument(level = "debug", skip(self))]
    async fn goal(&self, name: &str) -> Result<GoalDescription, TaskError> {
        let units = self
            .plugins
            .iter()
            .map(|(plugin_name, plugin)| -> BoxFuture<Result<GoalDescription, TaskError>> {
                let plugin_name = plugin_name.clone();
                let plugin = Arc::clone(plugin);
                let name = name.to_string();
                Box::pin(async move {
                    plugin.goal(&name).await.map_err(|e| {
                        if e.is_unsupported() {
                            e
                        } else {
                            e.for_member(&plugin_name)
                        }
                    })
                })
            })
            .collect();

        let mut errors = AggregateError::new();
        for r in fan_out(units).await {
            match r {
                Ok(goal) => return Ok(goal),
                Err(e) if e.is_unsupported() => {}
                Err(e) => errors.push(e),
            }
        }

        if let Some(goal) = builtin_goals().into_iter().find(|g| g.answers_to(name)) {
            return Ok(goal);
        }
        if !errors.is_empty() {
            return Err(errors.into_error());
        }
        Err(TaskError::unsupported(format!("goal {name}")))
    }

    #[instrument(level = "info", skip(self, ctx))]
    async fn prepare(&self, task: &str, ctx: &Context) -> Result<Arc<dyn Task>, PrepareError> {
        let path = TaskPath::parse(task).map_err(TaskError::from)?;

        let mut units: Vec<BoxFuture<Result<Prepared, TaskError>>> = Vec::new();
        for (name, plugin) in &self.plugins {
            if !self.enabled(&path, name) {
                trace!(plugin = %name, "plugin disabled for task");
                continue;
            }
            let member_ctx = ctx.child(name, self.member_base(&path, name)?)?;
            let plugin = Arc::clone(plugin);
            let name = name.clone();
            let task = task.to_string();
            units.push(Box::pin(async move {
                let res = plugin.prepare(&task, &member_ctx).await;
                Ok::<_, TaskError>((name, member_ctx, res))
            }));
        }

        let mut members = Vec::new();
        let mut orphans = Vec::new();
        let mut errors = AggregateError::new();
        for r in fan_out(units).await {
            match r {
                Err(e) => errors.push(e),
                Ok((plugin, ctx, Ok(task))) => members.push(Member { plugin, task, ctx }),
                Ok((plugin, _, Err(e))) if e.is_unsupported() => {
                    trace!(%plugin, "plugin does not implement task");
                }
                Ok((plugin, ctx, Err(PrepareError { error, task }))) => {
                    errors.push(error.for_member(&plugin));
                    if let Some(task) = task {
                        orphans.push(Member { plugin, task, ctx });
                    }
                }
            }
        }

        if !errors.is_empty() {
            debug!(
                prepared = members.len(),
                orphans = orphans.len(),
                "prepare failed, cancelling prepared instances"
            );
            let cancels = members
                .into_iter()
                .chain(orphans)
                .map(|m| -> BoxFuture<Result<(), TaskError>> {
                    Box::pin(async move { m.task.cancel(&m.ctx).await.map_err(|e| e.for_member(&m.plugin)) })
                })
                .collect();
            if let Err(e) = run_concurrently(cancels).await {
                errors.push(e);
            }
            return Err(errors.into_error().into());
        }

        if members.is_empty() {
            return Err(TaskError::unsupported(format!("task {task}")).into());
        }

        let composite = CompositeTask::new(task, members);
        info!(plugins = ?composite.plugins(), "prepared task");
        Ok(Arc::new(composite))
    }
}
