use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use stagehand_core::{
    Action, Context, Operation, Operations, Plugin, PrepareError, Stage, Task, TaskError,
};
use stagehand_model::{GoalDescription, TaskDescription, TaskRef};
use stagehand_store::{Delta, Kv};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, instrument, trace};

use crate::{
    convert::{WireDelta, delta_from_wire, delta_to_wire},
    error::RpcError,
    proto::{self, task_execution_client::TaskExecutionClient},
};

/// A plugin living in another process.
#[derive(Clone)]
pub struct RemotePlugin {
    name: String,
    client: TaskExecutionClient<Channel>,
}

impl RemotePlugin {
    pub fn new(name: impl Into<String>, channel: Channel) -> Self {
        Self {
            name: name.into(),
            client: TaskExecutionClient::new(channel),
        }
    }

    /// Connect to a plugin serving on `addr` (`http://host:port`).
    pub async fn connect(name: impl Into<String>, addr: impl Into<String>) -> Result<Self, RpcError> {
        let channel = Endpoint::from_shared(addr.into())?.connect().await?;
        Ok(Self::new(name, channel))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Plugin for RemotePlugin {
    async fn implements(&self) -> Result<Vec<TaskDescription>, TaskError> {
        let resp = self
            .client
            .clone()
            .implements(proto::ImplementsRequest {})
            .await
            .map_err(RpcError::from)?;
        Ok(resp
            .into_inner()
            .tasks
            .into_iter()
            .map(TaskDescription::from)
            .collect())
    }

    async fn goal(&self, name: &str) -> Result<GoalDescription, TaskError> {
        let resp = self
            .client
            .clone()
            .goal(proto::GoalRequest {
                name: name.to_string(),
            })
            .await
            .map_err(RpcError::from)?
            .into_inner();

        match resp.goal {
            Some(goal) if !resp.unsupported => Ok(goal.into()),
            _ => Err(TaskError::unsupported(format!("goal {name}"))),
        }
    }

    #[instrument(level = "debug", skip(self, ctx), fields(plugin = %self.name))]
    async fn prepare(&self, task: &str, ctx: &Context) -> Result<Arc<dyn Task>, PrepareError> {
        let snapshot = ctx.properties().all_settings();
        let resp = self
            .client
            .clone()
            .prepare(proto::PrepareRequest {
                name: task.to_string(),
                properties: delta_to_wire(snapshot.clone()),
            })
            .await
            .map_err(|e| TaskError::from(RpcError::from(e)))?
            .into_inner();

        if resp.unsupported {
            return Err(TaskError::unsupported(format!("task {task}")).into());
        }
        let task_ref: TaskRef = resp
            .task
            .ok_or_else(|| TaskError::Remote("prepare returned no task reference".into()))?
            .into();
        debug!(task = %task_ref, "remote instance prepared");

        let remote = RemoteTask::new(self.client.clone(), task_ref, snapshot);
        if let Err(e) = remote.inner.absorb(ctx, resp.delta) {
            return Err(PrepareError::with_task(e.into(), Arc::new(remote)));
        }

        if resp.error.is_empty() {
            Ok(Arc::new(remote))
        } else {
            Err(PrepareError::with_task(TaskError::Remote(resp.error), Arc::new(remote)))
        }
    }
}

/// Client-side handle to a task instance living in a plugin process.
///
/// Setup ran during prepare and teardown runs during cancel/complete, both on the remote
/// side, so those two stages are no-ops here.
pub struct RemoteTask {
    inner: Arc<RemoteInner>,
}

struct RemoteInner {
    client: TaskExecutionClient<Channel>,
    task: TaskRef,
    /// Property values the remote side is known to hold.
    known: Mutex<Delta>,
}

impl RemoteTask {
    fn new(client: TaskExecutionClient<Channel>, task: TaskRef, known: Delta) -> Self {
        Self {
            inner: Arc::new(RemoteInner {
                client,
                task,
                known: Mutex::new(known),
            }),
        }
    }

    pub fn task_ref(&self) -> &TaskRef {
        &self.inner.task
    }

    async fn prioritized(&self, stage: Stage, ctx: &Context) -> Result<Operations, TaskError> {
        let inner = &self.inner;
        let req = inner.request(ctx);
        let mut client = inner.client.clone();
        let resp = match stage {
            Stage::Begin => client.prepare_begin(req).await,
            Stage::Run => client.prepare_run(req).await,
            _ => client.prepare_end(req).await,
        }
        .map_err(RpcError::from)?
        .into_inner();

        inner.absorb(ctx, resp.delta)?;
        trace!(task = %inner.task, %stage, orders = ?resp.orders, "remote orders");

        Ok(resp
            .orders
            .into_iter()
            .map(|order| {
                let action = RemoteOperation {
                    inner: Arc::clone(inner),
                    stage,
                    order,
                };
                Operation::from_action(order, Arc::new(action))
            })
            .collect())
    }
}

impl RemoteInner {
    /// Properties in `ctx` the remote side has not seen yet; they are marked as known.
    fn outgoing(&self, ctx: &Context) -> Delta {
        let current = ctx.properties().all_settings();
        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        let delta: Delta = current
            .into_iter()
            .filter(|(k, v)| known.get(k) != Some(v))
            .collect();
        known.extend(delta.clone());
        delta
    }

    fn request(&self, ctx: &Context) -> proto::OperationRequest {
        proto::OperationRequest {
            task: Some(proto::TaskRef::from(&self.task)),
            delta: delta_to_wire(self.outgoing(ctx)),
        }
    }

    /// Write a delta returned by the remote side into `ctx`.
    fn absorb(&self, ctx: &Context, delta: WireDelta) -> Result<(), RpcError> {
        let delta = delta_from_wire(delta)?;
        if delta.is_empty() {
            return Ok(());
        }
        trace!(task = %self.task, keys = delta.len(), "absorbing remote delta");
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(delta.clone());
        ctx.properties().update(delta);
        Ok(())
    }

    async fn call(&self, call: Call, ctx: &Context) -> Result<(), TaskError> {
        let req = self.request(ctx);
        let mut client = self.client.clone();
        let resp = match call {
            Call::Check => client.execute_check(req).await,
            Call::Finish => client.execute_finish(req).await,
            Call::Cancel => client.cancel(req).await,
            Call::Complete => client.complete(req).await,
        }
        .map_err(RpcError::from)?
        .into_inner();

        self.absorb(ctx, resp.delta)?;
        Ok(())
    }
}

/// Single-shot remote calls exchanging one delta each way.
#[derive(Debug, Clone, Copy)]
enum Call {
    Check,
    Finish,
    Cancel,
    Complete,
}

/// Executes the remote operations of one stage at one order.
struct RemoteOperation {
    inner: Arc<RemoteInner>,
    stage: Stage,
    order: i32,
}

#[async_trait]
impl Action for RemoteOperation {
    async fn call(&self, ctx: &Context) -> Result<(), TaskError> {
        let inner = &self.inner;
        let req = proto::SubStageRequest {
            request: Some(inner.request(ctx)),
            order: self.order,
        };
        let mut client = inner.client.clone();
        let resp = match self.stage {
            Stage::Begin => client.execute_begin(req).await,
            Stage::Run => client.execute_run(req).await,
            _ => client.execute_end(req).await,
        }
        .map_err(RpcError::from)?
        .into_inner();

        inner.absorb(ctx, resp.delta)?;
        Ok(())
    }
}

#[async_trait]
impl Task for RemoteTask {
    async fn check(&self, ctx: &Context) -> Result<(), TaskError> {
        self.inner.call(Call::Check, ctx).await
    }

    async fn begin(&self, ctx: &Context) -> Result<Operations, TaskError> {
        self.prioritized(Stage::Begin, ctx).await
    }

    async fn run(&self, ctx: &Context) -> Result<Operations, TaskError> {
        self.prioritized(Stage::Run, ctx).await
    }

    async fn end(&self, ctx: &Context) -> Result<Operations, TaskError> {
        self.prioritized(Stage::End, ctx).await
    }

    async fn finish(&self, ctx: &Context) -> Result<(), TaskError> {
        self.inner.call(Call::Finish, ctx).await
    }

    async fn cancel(&self, ctx: &Context) -> Result<(), TaskError> {
        self.inner.call(Call::Cancel, ctx).await
    }

    async fn complete(&self, ctx: &Context) -> Result<(), TaskError> {
        self.inner.call(Call::Complete, ctx).await
    }
}
