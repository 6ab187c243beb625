use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, instrument, trace};

use crate::{
    concurrency::{BoxFuture, fan_out, partition, run_concurrently},
    context::Context,
    error::TaskError,
    task::{Action, Operation, Operations, Stage, Task, call_stage, collect_operations},
};

/// One plugin's instance of a composite task, with the context it runs under.
#[derive(Clone)]
pub struct Member {
    pub plugin: String,
    pub task: Arc<dyn Task>,
    pub ctx: Context,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Prepared,
    Started,
    Closed,
}

/// Several plugins' instances of one task, driven as a single [`Task`].
///
/// The member set is fixed at construction. Every stage fans out to all members; errors
/// are accumulated so one member's failure never keeps another from being called.
pub struct CompositeTask {
    name: String,
    members: Vec<Member>,
    phase: Mutex<Phase>,
}

impl CompositeTask {
    pub fn new(name: impl Into<String>, members: Vec<Member>) -> Self {
        Self {
            name: name.into(),
            members,
            phase: Mutex::new(Phase::Prepared),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn plugins(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.plugin.as_str()).collect()
    }

    fn start(&self) -> Result<(), TaskError> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        match *phase {
            Phase::Closed => Err(TaskError::Closed),
            _ => {
                *phase = Phase::Started;
                Ok(())
            }
        }
    }

    fn close(&self) -> Result<(), TaskError> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == Phase::Closed {
            return Err(TaskError::Closed);
        }
        *phase = Phase::Closed;
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(task = %self.name))]
    async fn fan_out_stage(&self, stage: Stage) -> Result<(), TaskError> {
        self.start()?;
        let units = self
            .members
            .iter()
            .cloned()
            .map(|m| -> BoxFuture<Result<(), TaskError>> {
                Box::pin(async move {
                    let res = call_stage(&*m.task, stage, &m.ctx).await;
                    m.ctx.merge();
                    res.map_err(|e| e.for_member(&m.plugin))
                })
            })
            .collect();
        run_concurrently(units).await
    }

    /// Gather every member's operations for `stage`, bound to the member's context.
    #[instrument(level = "debug", skip(self), fields(task = %self.name))]
    async fn gather(&self, stage: Stage) -> Result<Operations, TaskError> {
        self.start()?;
        let units = self
            .members
            .iter()
            .cloned()
            .map(|m| -> BoxFuture<Result<Operations, TaskError>> {
                Box::pin(async move {
                    let ops = collect_operations(&*m.task, stage, &m.ctx)
                        .await
                        .map_err(|e| e.for_member(&m.plugin))?;
                    m.ctx.merge();
                    trace!(plugin = %m.plugin, ops = ops.len(), "member proposed operations");
                    Ok::<Operations, TaskError>(ops.into_iter().map(|op| bind(op, &m)).collect())
                })
            })
            .collect();

        let (proposed, errors) = partition(fan_out(units).await);
        errors.into_result()?;
        Ok(proposed.into_iter().flatten().collect())
    }

    #[instrument(level = "debug", skip(self, ctx), fields(task = %self.name))]
    async fn terminate(&self, ctx: &Context, complete: bool) -> Result<(), TaskError> {
        self.close()?;
        debug!(members = self.members.len(), complete, "closing composite task");
        let units = self
            .members
            .iter()
            .cloned()
            .map(|m| -> BoxFuture<Result<(), TaskError>> {
                Box::pin(async move {
                    let res = if complete {
                        m.task.complete(&m.ctx).await
                    } else {
                        m.task.cancel(&m.ctx).await
                    };
                    m.ctx.merge();
                    res.map_err(|e| e.for_member(&m.plugin))
                })
            })
            .collect();
        let members = run_concurrently(units).await;

        let own = if complete {
            ctx.discard_cleanup();
            Ok(())
        } else {
            ctx.run_cleanup().await
        };

        match (members, own) {
            (Ok(()), own) => own,
            (Err(e), Ok(())) => Err(e),
            (Err(a), Err(b)) => Err(TaskError::Aggregate([a, b].into_iter().collect())),
        }
    }
}

/// Run an operation under its member's context and merge what it wrote.
struct MemberAction {
    inner: Arc<dyn Action>,
    plugin: String,
    ctx: Context,
}

fn bind(op: Operation, member: &Member) -> Operation {
    let action = MemberAction {
        inner: op.action,
        plugin: member.plugin.clone(),
        ctx: member.ctx.clone(),
    };
    Operation::from_action(op.order, Arc::new(action))
}

#[async_trait]
impl Action for MemberAction {
    async fn call(&self, _ctx: &Context) -> Result<(), TaskError> {
        let res = self.inner.call(&self.ctx).await;
        self.ctx.merge();
        res.map_err(|e| e.for_member(&self.plugin))
    }
}

#[async_trait]
impl Task for CompositeTask {
    async fn setup(&self, _ctx: &Context) -> Result<(), TaskError> {
        self.fan_out_stage(Stage::Setup).await
    }

    async fn check(&self, _ctx: &Context) -> Result<(), TaskError> {
        self.fan_out_stage(Stage::Check).await
    }

    async fn begin(&self, _ctx: &Context) -> Result<Operations, TaskError> {
        self.gather(Stage::Begin).await
    }

    async fn run(&self, _ctx: &Context) -> Result<Operations, TaskError> {
        self.gather(Stage::Run).await
    }

    async fn end(&self, _ctx: &Context) -> Result<Operations, TaskError> {
        self.gather(Stage::End).await
    }

    async fn finish(&self, _ctx: &Context) -> Result<(), TaskError> {
        self.fan_out_stage(Stage::Finish).await
    }

    async fn teardown(&self, _ctx: &Context) -> Result<(), TaskError> {
        self.fan_out_stage(Stage::Teardown).await
    }

    async fn cancel(&self, ctx: &Context) -> Result<(), TaskError> {
        self.terminate(ctx, false).await
    }

    async fn complete(&self, ctx: &Context) -> Result<(), TaskError> {
        self.terminate(ctx, true).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use stagehand_store::{KvExt, MemoryKv};

    use super::*;
    use crate::schedule::execute_operations;

    #[derive(Default)]
    struct Stub {
        fail_setup: bool,
        setup_called: AtomicBool,
        cancelled: AtomicUsize,
    }

    #[async_trait]
    impl Task for Stub {
        async fn setup(&self, ctx: &Context) -> Result<(), TaskError> {
            self.setup_called.store(true, Ordering::SeqCst);
            if self.fail_setup {
                return Err(TaskError::failed("no token"));
            }
            ctx.properties().set_value("stub.ready", true);
            Ok(())
        }

        async fn run(&self, _ctx: &Context) -> Result<Operations, TaskError> {
            Ok(vec![Operation::new(50, |ctx: Context| async move {
                let plugin = ctx.plugin().unwrap_or_default().to_string();
                ctx.properties().set_value(&format!("ran.{plugin}"), true);
                Ok(())
            })])
        }

        async fn cancel(&self, _ctx: &Context) -> Result<(), TaskError> {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Emits one operation per order; each records what the previous one left behind.
    struct Sequenced {
        orders: Vec<i32>,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Task for Sequenced {
        async fn run(&self, _ctx: &Context) -> Result<Operations, TaskError> {
            Ok(self
                .orders
                .iter()
                .map(|&order| {
                    let log = Arc::clone(&self.log);
                    Operation::new(order, move |ctx: Context| {
                        let log = Arc::clone(&log);
                        async move {
                            let me = format!("{}{order}", ctx.plugin().unwrap_or_default());
                            let last = ctx.properties().get_string("seq.last");
                            log.lock().unwrap().push(format!("{me} saw {last}"));
                            ctx.properties().set_value("seq.last", me);
                            Ok(())
                        }
                    })
                })
                .collect())
        }
    }

    fn composite(root: &Context, stubs: Vec<(&str, Arc<Stub>)>) -> CompositeTask {
        let members = stubs
            .into_iter()
            .map(|(plugin, task)| Member {
                plugin: plugin.to_string(),
                task,
                ctx: root.child(plugin, None).unwrap(),
            })
            .collect();
        CompositeTask::new("/release", members)
    }

    fn root() -> Context {
        Context::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn setup_failure_does_not_skip_other_members() {
        let ctx = root();
        let a = Arc::new(Stub {
            fail_setup: true,
            ..Stub::default()
        });
        let b = Arc::new(Stub::default());
        let task = composite(&ctx, vec![("a", a.clone()), ("b", b.clone())]);

        let err = task.setup(&ctx).await.unwrap_err();
        assert!(a.setup_called.load(Ordering::SeqCst));
        assert!(b.setup_called.load(Ordering::SeqCst));
        assert_eq!(err.to_string(), "plugin a: no token");
        assert!(ctx.properties().get_bool("stub.ready"));
    }

    #[tokio::test]
    async fn operations_run_under_member_contexts() {
        let ctx = root();
        let task = composite(
            &ctx,
            vec![("git", Arc::new(Stub::default())), ("github", Arc::new(Stub::default()))],
        );

        let ops = task.run(&ctx).await.unwrap();
        assert_eq!(ops.len(), 2);
        execute_operations(&ctx, ops).await.unwrap();

        assert!(ctx.properties().get_bool("ran.git"));
        assert!(ctx.properties().get_bool("ran.github"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn priority_order_holds_across_members() {
        let ctx = root();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::new(Sequenced {
            orders: vec![30, 10],
            log: Arc::clone(&log),
        });
        let b = Arc::new(Sequenced {
            orders: vec![20],
            log: Arc::clone(&log),
        });
        let members = vec![
            Member {
                plugin: "a".into(),
                task: a,
                ctx: ctx.child("a", None).unwrap(),
            },
            Member {
                plugin: "b".into(),
                task: b,
                ctx: ctx.child("b", None).unwrap(),
            },
        ];
        let task = CompositeTask::new("/release", members);

        let ops = task.run(&ctx).await.unwrap();
        assert_eq!(ops.len(), 3);
        execute_operations(&ctx, ops).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a10 saw ", "b20 saw a10", "a30 saw b20"]
        );
        assert_eq!(ctx.properties().get_string("seq.last"), "a30");
    }

    #[tokio::test]
    async fn cancel_reaches_every_member_once() {
        let ctx = root();
        let a = Arc::new(Stub::default());
        let b = Arc::new(Stub::default());
        let task = composite(&ctx, vec![("a", a.clone()), ("b", b.clone())]);

        task.cancel(&ctx).await.unwrap();
        assert_eq!(a.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(b.cancelled.load(Ordering::SeqCst), 1);

        assert!(matches!(task.cancel(&ctx).await, Err(TaskError::Closed)));
        assert!(matches!(task.setup(&ctx).await, Err(TaskError::Closed)));
        assert_eq!(a.cancelled.load(Ordering::SeqCst), 1);
    }
}
