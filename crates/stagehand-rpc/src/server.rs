use std::sync::Arc;

use stagehand_core::{
    Context, Plugin, PrepareError, Stage, TaskError,
    concurrency::{BoxFuture, run_concurrently},
    schedule::clamp_order,
    task::{call_stage, collect_operations},
};
use stagehand_model::TaskRef;
use stagehand_store::{Delta, MemoryKv};
use tonic::{Request, Response, Status};
use tracing::{debug, instrument, trace, warn};

use crate::{
    convert::{delta_from_wire, delta_to_wire},
    error::to_status,
    instance::{Instance, InstanceTable},
    proto::{self, task_execution_server::TaskExecution},
};

/// gRPC service exposing a [`Plugin`] and the task instances it prepares.
pub struct TaskExecutionService<P> {
    plugin: Arc<P>,
    instances: InstanceTable,
}

impl<P> TaskExecutionService<P>
where
    P: Plugin,
{
    pub fn new(plugin: Arc<P>) -> Self {
        Self {
            plugin,
            instances: InstanceTable::new(),
        }
    }

    pub fn instances(&self) -> &InstanceTable {
        &self.instances
    }

    /// Resolve the referenced instance and apply the caller's delta to it.
    fn enter(&self, req: proto::OperationRequest) -> Result<(TaskRef, Arc<Instance>), Status> {
        let task: TaskRef = req
            .task
            .ok_or_else(|| Status::invalid_argument("missing task reference"))?
            .into();
        let instance = self.instances.get(&task).map_err(to_status)?;

        let delta = delta_from_wire(req.delta).map_err(|e| Status::invalid_argument(e.to_string()))?;
        trace!(task = %task, keys = delta.len(), "applying caller delta");
        instance.ctx.properties().apply_upstream(delta);
        Ok((task, instance))
    }

    async fn stage(
        &self,
        stage: Stage,
        req: proto::OperationRequest,
    ) -> Result<Response<proto::OperationResponse>, Status> {
        let (task, instance) = self.enter(req)?;
        debug!(task = %task, %stage, "executing stage");

        let res = call_stage(&*instance.task, stage, &instance.ctx).await;
        let delta = flush(&instance.ctx);
        res.map_err(to_status)?;
        Ok(Response::new(proto::OperationResponse {
            delta: delta_to_wire(delta),
        }))
    }

    async fn prepare_stage(
        &self,
        stage: Stage,
        req: proto::OperationRequest,
    ) -> Result<Response<proto::SubStageResponse>, Status> {
        let (task, instance) = self.enter(req)?;

        let ops = collect_operations(&*instance.task, stage, &instance.ctx)
            .await
            .map_err(to_status)?;
        let mut orders: Vec<i32> = ops.iter().map(|op| clamp_order(op.order)).collect();
        orders.sort_unstable();
        orders.dedup();
        debug!(task = %task, %stage, ?orders, "stage operations prepared");

        instance.stash(stage, ops);
        Ok(Response::new(proto::SubStageResponse {
            orders,
            delta: delta_to_wire(flush(&instance.ctx)),
        }))
    }

    async fn execute_stage(
        &self,
        stage: Stage,
        req: proto::SubStageRequest,
    ) -> Result<Response<proto::OperationResponse>, Status> {
        let request = req
            .request
            .ok_or_else(|| Status::invalid_argument("missing operation request"))?;
        let (task, instance) = self.enter(request)?;

        let ops = instance.stashed(stage, req.order);
        debug!(task = %task, %stage, order = req.order, ops = ops.len(), "executing operations");

        let units: Vec<BoxFuture<Result<(), TaskError>>> = ops
            .into_iter()
            .map(|op| -> BoxFuture<Result<(), TaskError>> {
                let ctx = instance.ctx.clone();
                Box::pin(async move { op.call(&ctx).await })
            })
            .collect();
        let res = run_concurrently(units).await;
        let delta = flush(&instance.ctx);
        res.map_err(to_status)?;

        Ok(Response::new(proto::OperationResponse {
            delta: delta_to_wire(delta),
        }))
    }

    /// Remove the instance, tear it down and run its terminal method.
    async fn close(
        &self,
        req: proto::OperationRequest,
        complete: bool,
    ) -> Result<Response<proto::OperationResponse>, Status> {
        let task: TaskRef = req
            .task
            .ok_or_else(|| Status::invalid_argument("missing task reference"))?
            .into();
        let instance = self.instances.remove(&task).map_err(to_status)?;
        let delta = delta_from_wire(req.delta).map_err(|e| Status::invalid_argument(e.to_string()))?;
        instance.ctx.properties().apply_upstream(delta);

        if let Err(e) = instance.task.teardown(&instance.ctx).await {
            warn!(task = %task, error = %e, "teardown failed");
        }
        let res = if complete {
            instance.task.complete(&instance.ctx).await
        } else {
            instance.task.cancel(&instance.ctx).await
        };
        debug!(task = %task, complete, ok = res.is_ok(), "instance closed");

        let delta = flush(&instance.ctx);
        res.map_err(to_status)?;
        Ok(Response::new(proto::OperationResponse {
            delta: delta_to_wire(delta),
        }))
    }
}

/// Take the changes a call produced and keep them visible to later calls.
fn flush(ctx: &Context) -> Delta {
    let delta = ctx.properties().drain_changes();
    ctx.properties().apply_upstream(delta.clone());
    delta
}

#[tonic::async_trait]
impl<P> TaskExecution for TaskExecutionService<P>
where
    P: Plugin + 'static,
{
    async fn implements(
        &self,
        _request: Request<proto::ImplementsRequest>,
    ) -> Result<Response<proto::ImplementsResponse>, Status> {
        let tasks = self.plugin.implements().await.map_err(to_status)?;
        Ok(Response::new(proto::ImplementsResponse {
            tasks: tasks.into_iter().map(proto::TaskDescription::from).collect(),
        }))
    }

    async fn goal(
        &self,
        request: Request<proto::GoalRequest>,
    ) -> Result<Response<proto::GoalResponse>, Status> {
        let req = request.into_inner();
        match self.plugin.goal(&req.name).await {
            Ok(goal) => Ok(Response::new(proto::GoalResponse {
                goal: Some(goal.into()),
                unsupported: false,
            })),
            Err(e) if e.is_unsupported() => Ok(Response::new(proto::GoalResponse {
                goal: None,
                unsupported: true,
            })),
            Err(e) => Err(to_status(e)),
        }
    }

    #[instrument(level = "debug", skip_all)]
    async fn prepare(
        &self,
        request: Request<proto::PrepareRequest>,
    ) -> Result<Response<proto::PrepareResponse>, Status> {
        let req = request.into_inner();
        let snapshot =
            delta_from_wire(req.properties).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let ctx = Context::new(Arc::new(MemoryKv::with_values(snapshot)));

        let (task, error) = match self.plugin.prepare(&req.name, &ctx).await {
            Err(e) if e.is_unsupported() => {
                trace!(task = %req.name, "task not implemented");
                return Ok(Response::new(proto::PrepareResponse {
                    unsupported: true,
                    ..Default::default()
                }));
            }
            Err(PrepareError { error, task: None }) => return Err(to_status(error)),
            Err(PrepareError {
                error,
                task: Some(task),
            }) => (task, Some(error)),
            Ok(task) => {
                let error = task.setup(&ctx).await.err().map(|e| e.at_stage(Stage::Setup));
                (task, error)
            }
        };

        let delta = flush(&ctx);
        let task_ref = self.instances.insert(&req.name, task, ctx);
        match &error {
            Some(e) => warn!(task = %task_ref, error = %e, "prepared instance failed to set up"),
            None => debug!(task = %task_ref, "prepared instance"),
        }

        Ok(Response::new(proto::PrepareResponse {
            task: Some(proto::TaskRef::from(&task_ref)),
            delta: delta_to_wire(delta),
            unsupported: false,
            error: error.map(|e| e.to_string()).unwrap_or_default(),
        }))
    }

    async fn cancel(
        &self,
        request: Request<proto::OperationRequest>,
    ) -> Result<Response<proto::OperationResponse>, Status> {
        self.close(request.into_inner(), false).await
    }

    async fn complete(
        &self,
        request: Request<proto::OperationRequest>,
    ) -> Result<Response<proto::OperationResponse>, Status> {
        self.close(request.into_inner(), true).await
    }

    async fn execute_check(
        &self,
        request: Request<proto::OperationRequest>,
    ) -> Result<Response<proto::OperationResponse>, Status> {
        self.stage(Stage::Check, request.into_inner()).await
    }

    async fn prepare_begin(
        &self,
        request: Request<proto::OperationRequest>,
    ) -> Result<Response<proto::SubStageResponse>, Status> {
        self.prepare_stage(Stage::Begin, request.into_inner()).await
    }

    async fn execute_begin(
        &self,
        request: Request<proto::SubStageRequest>,
    ) -> Result<Response<proto::OperationResponse>, Status> {
        self.execute_stage(Stage::Begin, request.into_inner()).await
    }

    async fn prepare_run(
        &self,
        request: Request<proto::OperationRequest>,
    ) -> Result<Response<proto::SubStageResponse>, Status> {
        self.prepare_stage(Stage::Run, request.into_inner()).await
    }

    async fn execute_run(
        &self,
        request: Request<proto::SubStageRequest>,
    ) -> Result<Response<proto::OperationResponse>, Status> {
        self.execute_stage(Stage::Run, request.into_inner()).await
    }

    async fn prepare_end(
        &self,
        request: Request<proto::OperationRequest>,
    ) -> Result<Response<proto::SubStageResponse>, Status> {
        self.prepare_stage(Stage::End, request.into_inner()).await
    }

    async fn execute_end(
        &self,
        request: Request<proto::SubStageRequest>,
    ) -> Result<Response<proto::OperationResponse>, Status> {
        self.execute_stage(Stage::End, request.into_inner()).await
    }

    async fn execute_finish(
        &self,
        request: Request<proto::OperationRequest>,
    ) -> Result<Response<proto::OperationResponse>, Status> {
        self.stage(Stage::Finish, request.into_inner()).await
    }
}
