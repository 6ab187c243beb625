use stagehand_model::dependency_order;
use tracing::{info, instrument, warn};

use crate::{
    context::Context,
    error::{AggregateError, TaskError},
    lifecycle::execute,
    plugin::{Plugin, PrepareError},
};

/// Prepare, execute and close one task.
///
/// A successful run is completed. Any failure cancels the task so registered cleanups run,
/// and the cancel errors are reported together with the failure.
#[instrument(level = "info", skip(plugin, ctx))]
pub async fn run(plugin: &dyn Plugin, task: &str, ctx: &Context) -> Result<(), TaskError> {
    let prepared = match plugin.prepare(task, ctx).await {
        Ok(t) => t,
        Err(PrepareError { error, task: Some(orphan) }) => {
            let mut errors = AggregateError::new();
            errors.push(error);
            if let Err(e) = orphan.cancel(ctx).await {
                errors.push(e);
            }
            return Err(errors.into_error());
        }
        Err(PrepareError { error, task: None }) => return Err(error),
    };

    match execute(&*prepared, ctx).await {
        Ok(()) => {
            prepared.complete(ctx).await?;
            info!("task completed");
            Ok(())
        }
        Err(err) => {
            warn!(error = %err, "task failed, cancelling");
            match prepared.cancel(ctx).await {
                Ok(()) => Err(err),
                Err(cancel) => Err(TaskError::Aggregate([err, cancel].into_iter().collect())),
            }
        }
    }
}

/// Run every task `task` transitively requires, then `task` itself.
#[instrument(level = "info", skip(plugin, ctx))]
pub async fn run_with_requirements(
    plugin: &dyn Plugin,
    task: &str,
    ctx: &Context,
) -> Result<(), TaskError> {
    let implemented = plugin.implements().await?;
    for name in dependency_order(&implemented, task)? {
        run(plugin, &name, ctx).await?;
    }
    Ok(())
}
