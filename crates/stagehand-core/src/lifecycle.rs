use tracing::{debug, instrument, warn};

use crate::{
    context::Context,
    error::TaskError,
    schedule::execute_operations,
    task::{Stage, Task, collect_operations},
};

/// Drive `task` through every stage in order, then always attempt teardown.
///
/// The first failing stage stops the run and is returned wrapped with its [`Stage`].
/// A teardown failure is logged and never replaces the outcome of the earlier stages.
#[instrument(level = "info", skip_all, fields(plugin = ?ctx.plugin()))]
pub async fn execute(task: &dyn Task, ctx: &Context) -> Result<(), TaskError> {
    let result = drive(task, ctx).await;

    if let Err(e) = task.teardown(ctx).await {
        warn!(error = %e, "teardown failed");
    }
    result
}

async fn drive(task: &dyn Task, ctx: &Context) -> Result<(), TaskError> {
    task.setup(ctx).await.map_err(|e| e.at_stage(Stage::Setup))?;
    task.check(ctx).await.map_err(|e| e.at_stage(Stage::Check))?;

    for stage in [Stage::Begin, Stage::Run, Stage::End] {
        let ops = collect_operations(task, stage, ctx)
            .await
            .map_err(|e| e.at_stage(stage))?;
        debug!(%stage, ops = ops.len(), "executing stage operations");
        execute_operations(ctx, ops)
            .await
            .map_err(|e| e.at_stage(stage))?;
    }

    task.finish(ctx).await.map_err(|e| e.at_stage(Stage::Finish))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use stagehand_store::MemoryKv;

    use super::*;
    use crate::task::{Operation, Operations};

    #[derive(Default)]
    struct Recorder {
        fail: Option<Stage>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn note(&self, stage: Stage) -> Result<(), TaskError> {
            self.log.lock().unwrap().push(stage.to_string());
            if self.fail == Some(stage) {
                return Err(TaskError::failed("boom"));
            }
            Ok(())
        }

        fn ops(&self, stage: Stage) -> Result<Operations, TaskError> {
            self.note(stage)?;
            let log = Arc::clone(&self.log);
            Ok(vec![Operation::new(10, move |_| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(format!("{stage}:op"));
                    Ok(())
                }
            })])
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Task for Recorder {
        async fn setup(&self, _ctx: &Context) -> Result<(), TaskError> {
            self.note(Stage::Setup)
        }
        async fn check(&self, _ctx: &Context) -> Result<(), TaskError> {
            self.note(Stage::Check)
        }
        async fn begin(&self, _ctx: &Context) -> Result<Operations, TaskError> {
            self.ops(Stage::Begin)
        }
        async fn run(&self, _ctx: &Context) -> Result<Operations, TaskError> {
            self.ops(Stage::Run)
        }
        async fn end(&self, _ctx: &Context) -> Result<Operations, TaskError> {
            self.ops(Stage::End)
        }
        async fn finish(&self, _ctx: &Context) -> Result<(), TaskError> {
            self.note(Stage::Finish)
        }
        async fn teardown(&self, _ctx: &Context) -> Result<(), TaskError> {
            self.note(Stage::Teardown)
        }
    }

    fn ctx() -> Context {
        Context::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn stages_run_in_fixed_order() {
        let task = Recorder::default();
        execute(&task, &ctx()).await.unwrap();
        assert_eq!(
            task.log(),
            vec![
                "setup", "check", "begin", "begin:op", "run", "run:op", "end", "end:op",
                "finish", "teardown"
            ]
        );
    }

    #[tokio::test]
    async fn check_failure_skips_later_stages_but_not_teardown() {
        let task = Recorder {
            fail: Some(Stage::Check),
            ..Recorder::default()
        };
        let err = execute(&task, &ctx()).await.unwrap_err();

        assert!(matches!(err, TaskError::Stage { stage: Stage::Check, .. }));
        assert_eq!(err.to_string(), "check failed: boom");
        assert_eq!(task.log(), vec!["setup", "check", "teardown"]);
    }

    #[tokio::test]
    async fn teardown_failure_does_not_fail_the_run() {
        let task = Recorder {
            fail: Some(Stage::Teardown),
            ..Recorder::default()
        };
        execute(&task, &ctx()).await.unwrap();
        assert_eq!(task.log().last().map(String::as_str), Some("teardown"));
    }
}
