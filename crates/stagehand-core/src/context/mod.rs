use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
};

use stagehand_store::{Delta, Kv, LayeredKv, TrackedKv};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{AggregateError, TaskError};

type CleanupFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;
type CleanupFn = Box<dyn FnOnce(Context) -> CleanupFuture + Send>;

/// Execution context handed to every stage and operation.
///
/// Cloning is cheap and yields a handle to the same context. A context carries:
/// - the change-tracked property store the task reads and writes;
/// - the name of the plugin it is scoped to, if any;
/// - compensating actions registered with [`Context::for_cleanup`];
/// - a cancellation token actions may honour.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    properties: Arc<TrackedKv>,
    plugin: Option<String>,
    parent: Option<Context>,
    cleanup: Mutex<Vec<CleanupFn>>,
    cancel: CancellationToken,
    /// Shared by a root context and all of its children.
    merge: Arc<Mutex<()>>,
}

impl Context {
    pub fn new(properties: Arc<dyn Kv>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                properties: Arc::new(TrackedKv::new(properties)),
                plugin: None,
                parent: None,
                cleanup: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
                merge: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Derive a context scoped to `plugin`.
    ///
    /// The child reads through to this context's properties, falling back to `base` for keys
    /// set nowhere above it. Writes stay in the child until [`Context::merge`] moves them up.
    pub fn child(&self, plugin: &str, base: Option<Arc<dyn Kv>>) -> Result<Self, TaskError> {
        let parent: Arc<dyn Kv> = self.inner.properties.clone();
        let view: Arc<dyn Kv> = match base {
            Some(base) => Arc::new(LayeredKv::new(vec![base, parent])?),
            None => parent,
        };

        Ok(Self {
            inner: Arc::new(ContextInner {
                properties: Arc::new(TrackedKv::new(view)),
                plugin: Some(plugin.to_string()),
                parent: Some(self.clone()),
                cleanup: Mutex::new(Vec::new()),
                cancel: self.inner.cancel.child_token(),
                merge: Arc::clone(&self.inner.merge),
            }),
        })
    }

    pub fn properties(&self) -> &Arc<TrackedKv> {
        &self.inner.properties
    }

    pub fn plugin(&self) -> Option<&str> {
        self.inner.plugin.as_deref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Move the changes recorded in this context into its parent.
    ///
    /// Merges across one context family are serialized. Returns the merged delta; a root
    /// context keeps its changes and returns an empty delta.
    pub fn merge(&self) -> Delta {
        let Some(parent) = &self.inner.parent else {
            return Delta::new();
        };

        let _guard = self.inner.merge.lock().unwrap_or_else(PoisonError::into_inner);
        let delta = self.inner.properties.drain_changes();
        if !delta.is_empty() {
            trace!(plugin = ?self.plugin(), keys = delta.len(), "merging context changes");
            parent.inner.properties.update(delta.clone());
        }
        delta
    }

    /// Register a compensating action, run by [`Context::run_cleanup`] if the task is cancelled.
    pub fn for_cleanup<F, Fut>(&self, f: F)
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let boxed: CleanupFn = Box::new(move |ctx| Box::pin(f(ctx)));
        self.inner
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(boxed);
    }

    pub fn pending_cleanups(&self) -> usize {
        self.inner
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run every registered cleanup, most recent first. Every cleanup is attempted.
    pub async fn run_cleanup(&self) -> Result<(), TaskError> {
        let actions = self.take_cleanup();
        let mut errors = AggregateError::new();
        for action in actions.into_iter().rev() {
            if let Err(e) = action(self.clone()).await {
                errors.push(e);
            }
        }
        errors.into_result()
    }

    /// Forget every registered cleanup without running it.
    pub fn discard_cleanup(&self) {
        drop(self.take_cleanup());
    }

    fn take_cleanup(&self) -> Vec<CleanupFn> {
        std::mem::take(
            &mut *self
                .inner
                .cleanup
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use stagehand_store::{KvExt, MemoryKv, Value};

    use super::*;

    fn root() -> Context {
        Context::new(Arc::new(MemoryKv::with_values([(
            "release.tag",
            Value::from("v1.0.0"),
        )])))
    }

    #[test]
    fn child_writes_stay_local_until_merged() {
        let ctx = root();
        let child = ctx.child("github", None).unwrap();
        child.properties().set_value("release.tag", "v1.2.3");

        assert_eq!(ctx.properties().get_string("release.tag"), "v1.0.0");
        assert_eq!(child.properties().get_string("release.tag"), "v1.2.3");

        let delta = child.merge();
        assert_eq!(delta.len(), 1);
        assert_eq!(ctx.properties().get_string("release.tag"), "v1.2.3");
        assert_eq!(child.properties().get_string("release.tag"), "v1.2.3");
        assert!(child.merge().is_empty());
    }

    #[test]
    fn base_layer_only_fills_gaps() {
        let ctx = root();
        let base: Arc<dyn Kv> = Arc::new(MemoryKv::with_values([
            ("release.tag", Value::from("v0")),
            ("github.owner", Value::from("acme")),
        ]));
        let child = ctx.child("github", Some(base)).unwrap();

        assert_eq!(child.properties().get_string("release.tag"), "v1.0.0");
        assert_eq!(child.properties().get_string("github.owner"), "acme");
        assert!(!ctx.properties().is_set("github.owner"));
        assert_eq!(child.plugin(), Some("github"));
    }

    #[tokio::test]
    async fn cleanups_run_in_reverse_order() {
        let ctx = root();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            ctx.for_cleanup(move |_| async move {
                seen.lock().unwrap().push(i);
                Ok(())
            });
        }
        assert_eq!(ctx.pending_cleanups(), 3);

        ctx.run_cleanup().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![2, 1, 0]);
        assert_eq!(ctx.pending_cleanups(), 0);
    }

    #[tokio::test]
    async fn failing_cleanup_does_not_stop_the_rest() {
        let ctx = root();
        let ran = Arc::new(StdMutex::new(false));
        let flag = Arc::clone(&ran);
        ctx.for_cleanup(move |_| async move {
            *flag.lock().unwrap() = true;
            Ok(())
        });
        ctx.for_cleanup(|_| async { Err(TaskError::failed("revert tag")) });

        let err = ctx.run_cleanup().await.unwrap_err();
        assert_eq!(err.to_string(), "revert tag");
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn child_token_follows_parent() {
        let ctx = root();
        let child = ctx.child("git", None).unwrap();
        ctx.cancellation().cancel();
        assert!(child.is_cancelled());
    }
}
