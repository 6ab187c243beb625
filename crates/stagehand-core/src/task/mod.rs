mod operation;
pub use operation::{Action, Operation, Operations};

use std::fmt;

use async_trait::async_trait;

use crate::{context::Context, error::TaskError};

/// The seven fixed lifecycle steps, in invocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Setup,
    Check,
    Begin,
    Run,
    End,
    Finish,
    Teardown,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Setup,
        Stage::Check,
        Stage::Begin,
        Stage::Run,
        Stage::End,
        Stage::Finish,
        Stage::Teardown,
    ];

    /// Whether the stage emits operations instead of doing its work directly.
    pub fn is_prioritized(self) -> bool {
        matches!(self, Stage::Begin | Stage::Run | Stage::End)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Check => "check",
            Stage::Begin => "begin",
            Stage::Run => "run",
            Stage::End => "end",
            Stage::Finish => "finish",
            Stage::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of orchestrated work.
///
/// Every stage has a no-op default so implementations override only what they need.
/// Exactly one of [`Task::cancel`] or [`Task::complete`] closes a task; no lifecycle call
/// may follow either of them.
#[async_trait]
pub trait Task: Send + Sync {
    async fn setup(&self, _ctx: &Context) -> Result<(), TaskError> {
        Ok(())
    }

    async fn check(&self, _ctx: &Context) -> Result<(), TaskError> {
        Ok(())
    }

    async fn begin(&self, _ctx: &Context) -> Result<Operations, TaskError> {
        Ok(Operations::new())
    }

    async fn run(&self, _ctx: &Context) -> Result<Operations, TaskError> {
        Ok(Operations::new())
    }

    async fn end(&self, _ctx: &Context) -> Result<Operations, TaskError> {
        Ok(Operations::new())
    }

    async fn finish(&self, _ctx: &Context) -> Result<(), TaskError> {
        Ok(())
    }

    async fn teardown(&self, _ctx: &Context) -> Result<(), TaskError> {
        Ok(())
    }

    /// Abnormal exit: runs the cleanups registered on `ctx`, most recent first.
    async fn cancel(&self, ctx: &Context) -> Result<(), TaskError> {
        ctx.run_cleanup().await
    }

    /// Normal exit: registered cleanups are dropped.
    async fn complete(&self, ctx: &Context) -> Result<(), TaskError> {
        ctx.discard_cleanup();
        Ok(())
    }
}

/// Invoke one of the non-prioritized stages by name.
///
/// Prioritized stages are rejected with [`TaskError::WrongStage`]: their operations must go
/// through [`collect_operations`] and the scheduler.
pub async fn call_stage(task: &dyn Task, stage: Stage, ctx: &Context) -> Result<(), TaskError> {
    match stage {
        Stage::Setup => task.setup(ctx).await,
        Stage::Check => task.check(ctx).await,
        Stage::Finish => task.finish(ctx).await,
        Stage::Teardown => task.teardown(ctx).await,
        Stage::Begin | Stage::Run | Stage::End => Err(TaskError::WrongStage(stage)),
    }
}

/// Invoke one of the prioritized stages by name.
pub async fn collect_operations(
    task: &dyn Task,
    stage: Stage,
    ctx: &Context,
) -> Result<Operations, TaskError> {
    match stage {
        Stage::Begin => task.begin(ctx).await,
        Stage::Run => task.run(ctx).await,
        Stage::End => task.end(ctx).await,
        Stage::Setup | Stage::Check | Stage::Finish | Stage::Teardown => {
            Err(TaskError::WrongStage(stage))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use stagehand_store::MemoryKv;

    use super::*;

    struct Flagger {
        ran: Arc<AtomicBool>,
        checked: AtomicBool,
    }

    #[async_trait]
    impl Task for Flagger {
        async fn check(&self, _ctx: &Context) -> Result<(), TaskError> {
            self.checked.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn run(&self, _ctx: &Context) -> Result<Operations, TaskError> {
            let ran = Arc::clone(&self.ran);
            Ok(vec![Operation::new(10, move |_ctx: Context| {
                let ran = Arc::clone(&ran);
                async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })])
        }
    }

    fn flagger() -> Flagger {
        Flagger {
            ran: Arc::new(AtomicBool::new(false)),
            checked: AtomicBool::new(false),
        }
    }

    fn ctx() -> Context {
        Context::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn call_stage_rejects_prioritized_stages() {
        let task = flagger();
        let ctx = ctx();

        for stage in [Stage::Begin, Stage::Run, Stage::End] {
            let err = call_stage(&task, stage, &ctx).await.unwrap_err();
            assert!(matches!(err, TaskError::WrongStage(s) if s == stage), "{err}");
        }
        assert_eq!(
            call_stage(&task, Stage::Run, &ctx).await.unwrap_err().to_string(),
            "run stage cannot be called directly"
        );
        assert!(!task.ran.load(Ordering::SeqCst));

        call_stage(&task, Stage::Check, &ctx).await.unwrap();
        assert!(task.checked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn collect_operations_rejects_plain_stages() {
        let task = flagger();
        let ctx = ctx();

        for stage in [Stage::Setup, Stage::Check, Stage::Finish, Stage::Teardown] {
            let err = collect_operations(&task, stage, &ctx).await.unwrap_err();
            assert!(matches!(err, TaskError::WrongStage(s) if s == stage), "{err}");
        }
        assert!(!task.checked.load(Ordering::SeqCst));
        assert_eq!(
            collect_operations(&task, Stage::Finish, &ctx)
                .await
                .unwrap_err()
                .to_string(),
            "finish stage cannot be collected"
        );

        let ops = collect_operations(&task, Stage::Run, &ctx).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert!(!task.ran.load(Ordering::SeqCst));
        ops[0].call(&ctx).await.unwrap();
        assert!(task.ran.load(Ordering::SeqCst));
    }
}
