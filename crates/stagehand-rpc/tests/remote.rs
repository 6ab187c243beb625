use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use stagehand_core::{
    Context, Master, Operation, Operations, Plugin, PrepareError, Task, TaskError,
    execute_operations, run,
};
use stagehand_model::{GoalDescription, TaskDescription};
use stagehand_rpc::{RemotePlugin, serve_with_listener};
use stagehand_store::{Kv, KvExt, MemoryKv, Value};
use tokio::{net::TcpListener, sync::oneshot};

struct Tagger {
    cleaned: Arc<AtomicBool>,
}

#[async_trait]
impl Task for Tagger {
    async fn check(&self, ctx: &Context) -> Result<(), TaskError> {
        if !ctx.properties().is_set("release.version") {
            return Err(TaskError::failed("release.version is not set"));
        }
        Ok(())
    }

    async fn run(&self, _ctx: &Context) -> Result<Operations, TaskError> {
        let cleaned = Arc::clone(&self.cleaned);
        Ok(vec![Operation::new(10, move |ctx: Context| {
            let cleaned = Arc::clone(&cleaned);
            async move {
                let version = ctx.properties().get_string("release.version");
                ctx.properties().set_value("release.tag", format!("v{version}"));
                ctx.for_cleanup(move |_| async move {
                    cleaned.store(true, Ordering::SeqCst);
                    Ok(())
                });
                Ok(())
            }
        })])
    }

    async fn finish(&self, ctx: &Context) -> Result<(), TaskError> {
        ctx.properties().set_value("release.finished", true);
        Ok(())
    }
}

/// Writes at order 10, then reports what it sees at order 30.
struct Publisher;

#[async_trait]
impl Task for Publisher {
    async fn run(&self, _ctx: &Context) -> Result<Operations, TaskError> {
        Ok(vec![
            Operation::new(30, |ctx: Context| async move {
                let local = ctx.properties().get_string("publish.local");
                ctx.properties()
                    .set_value("publish.summary", format!("r30 saw {local}"));
                Ok(())
            }),
            Operation::new(10, |ctx: Context| async move {
                ctx.properties().set_value("publish.remote", "r10");
                Ok(())
            }),
        ])
    }
}

/// In-process member of the same task, slotted between the remote orders.
struct Announcer;

#[async_trait]
impl Task for Announcer {
    async fn run(&self, _ctx: &Context) -> Result<Operations, TaskError> {
        Ok(vec![Operation::new(20, |ctx: Context| async move {
            let remote = ctx.properties().get_string("publish.remote");
            ctx.properties()
                .set_value("publish.local", format!("l20 saw {remote}"));
            Ok(())
        })])
    }
}

struct AnnouncePlugin;

#[async_trait]
impl Plugin for AnnouncePlugin {
    async fn implements(&self) -> Result<Vec<TaskDescription>, TaskError> {
        Ok(vec![TaskDescription::new(
            "announce",
            "/publish",
            "Announce the release",
            Vec::<String>::new(),
        )])
    }

    async fn goal(&self, name: &str) -> Result<GoalDescription, TaskError> {
        Err(TaskError::unsupported(name))
    }

    async fn prepare(&self, task: &str, _ctx: &Context) -> Result<Arc<dyn Task>, PrepareError> {
        match task {
            "/publish" => Ok(Arc::new(Announcer)),
            _ => Err(TaskError::unsupported(task).into()),
        }
    }
}

struct BrokenSetup;

#[async_trait]
impl Task for BrokenSetup {
    async fn setup(&self, _ctx: &Context) -> Result<(), TaskError> {
        Err(TaskError::failed("missing token"))
    }
}

#[derive(Default)]
struct ReleasePlugin {
    cleaned: Arc<AtomicBool>,
}

#[async_trait]
impl Plugin for ReleasePlugin {
    async fn implements(&self) -> Result<Vec<TaskDescription>, TaskError> {
        Ok(vec![TaskDescription::new(
            "release",
            "/release",
            "Tag the release",
            Vec::<String>::new(),
        )])
    }

    async fn goal(&self, name: &str) -> Result<GoalDescription, TaskError> {
        match name {
            "release" => Ok(GoalDescription::new("release", "Mint and publish a release.")
                .with_plugin("release")),
            _ => Err(TaskError::unsupported(name)),
        }
    }

    async fn prepare(&self, task: &str, _ctx: &Context) -> Result<Arc<dyn Task>, PrepareError> {
        match task {
            "/release" => Ok(Arc::new(Tagger {
                cleaned: Arc::clone(&self.cleaned),
            })),
            "/broken" => Ok(Arc::new(BrokenSetup)),
            "/publish" => Ok(Arc::new(Publisher)),
            _ => Err(TaskError::unsupported(task).into()),
        }
    }
}

struct Harness {
    remote: RemotePlugin,
    cleaned: Arc<AtomicBool>,
    _stop: oneshot::Sender<()>,
}

async fn start() -> Harness {
    let plugin = ReleasePlugin::default();
    let cleaned = Arc::clone(&plugin.cleaned);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(serve_with_listener(Arc::new(plugin), listener, async {
        let _ = stopped.await;
    }));

    let remote = RemotePlugin::connect("release", format!("http://{addr}"))
        .await
        .unwrap();
    Harness {
        remote,
        cleaned,
        _stop: stop,
    }
}

fn ctx(version: &str) -> Context {
    Context::new(Arc::new(MemoryKv::with_values([(
        "release.version",
        Value::from(version),
    )])))
}

#[tokio::test]
async fn run_delta_reaches_master_store() {
    let h = start().await;
    let ctx = ctx("1.2.3");

    let task = h.remote.prepare("/release", &ctx).await.unwrap();
    task.check(&ctx).await.unwrap();

    let ops = task.run(&ctx).await.unwrap();
    assert_eq!(ops.len(), 1);
    execute_operations(&ctx, ops).await.unwrap();
    assert_eq!(ctx.properties().get_string("release.tag"), "v1.2.3");

    task.complete(&ctx).await.unwrap();
    assert!(!h.cleaned.load(Ordering::SeqCst));
}

#[tokio::test]
async fn local_changes_are_sent_with_the_next_call() {
    let h = start().await;
    let ctx = ctx("1.2.3");

    let task = h.remote.prepare("/release", &ctx).await.unwrap();
    ctx.properties().set_value("release.version", "2.0.0");

    let ops = task.run(&ctx).await.unwrap();
    execute_operations(&ctx, ops).await.unwrap();
    assert_eq!(ctx.properties().get_string("release.tag"), "v2.0.0");

    task.complete(&ctx).await.unwrap();
}

#[tokio::test]
async fn reference_is_invalid_after_complete() {
    let h = start().await;
    let ctx = ctx("1.2.3");

    let task = h.remote.prepare("/release", &ctx).await.unwrap();
    task.complete(&ctx).await.unwrap();

    let err = task.check(&ctx).await.unwrap_err();
    assert!(matches!(err, TaskError::NotFound { .. }), "{err}");
    assert!(task.complete(&ctx).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn cancel_runs_remote_cleanups() {
    let h = start().await;
    let ctx = ctx("1.2.3");

    let task = h.remote.prepare("/release", &ctx).await.unwrap();
    let ops = task.run(&ctx).await.unwrap();
    execute_operations(&ctx, ops).await.unwrap();

    task.cancel(&ctx).await.unwrap();
    assert!(h.cleaned.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failed_setup_returns_a_handle_to_cancel() {
    let h = start().await;
    let ctx = ctx("1.2.3");

    let err = h.remote.prepare("/broken", &ctx).await.err().unwrap();
    assert_eq!(err.to_string(), "remote error: setup failed: missing token");
    let handle = err.task.expect("instance survives a failed setup");
    handle.cancel(&ctx).await.unwrap();
    assert!(handle.cancel(&ctx).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn unsupported_names_are_reported_as_such() {
    let h = start().await;

    let err = h.remote.prepare("/lint", &ctx("1")).await.err().unwrap();
    assert!(err.is_unsupported());
    assert!(h.remote.goal("lint").await.unwrap_err().is_unsupported());

    let goal = h.remote.goal("release").await.unwrap();
    assert_eq!(goal.plugin, "release");
    assert_eq!(h.remote.implements().await.unwrap()[0].name, "/release");
}

#[tokio::test]
async fn master_runs_remote_plugin_end_to_end() {
    let h = start().await;
    let mut master = Master::new();
    master.register("release", Arc::new(h.remote.clone()));

    let ctx = ctx("3.1.0");
    run(&master, "/release", &ctx).await.unwrap();

    assert_eq!(ctx.properties().get_string("release.tag"), "v3.1.0");
    assert!(ctx.properties().get_bool("release.finished"));
    assert!(!h.cleaned.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failing_check_cancels_through_master() {
    let h = start().await;
    let mut master = Master::new();
    master.register("release", Arc::new(h.remote.clone()));

    let ctx = Context::new(Arc::new(MemoryKv::new()));
    let err = run(&master, "/release", &ctx).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "check failed: plugin release: remote error: release.version is not set"
    );
}

#[tokio::test]
async fn remote_and_local_operations_interleave_by_order() {
    let h = start().await;
    let mut master = Master::new();
    master.register("release", Arc::new(h.remote.clone()));
    master.register("announce", Arc::new(AnnouncePlugin));

    let ctx = Context::new(Arc::new(MemoryKv::new()));
    run(&master, "/publish", &ctx).await.unwrap();

    assert_eq!(ctx.properties().get_string("publish.remote"), "r10");
    assert_eq!(ctx.properties().get_string("publish.local"), "l20 saw r10");
    assert_eq!(
        ctx.properties().get_string("publish.summary"),
        "r30 saw l20 saw r10"
    );
}
