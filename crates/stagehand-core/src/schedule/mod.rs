use std::sync::Arc;

use stagehand_model::Order;
use tracing::{debug, instrument, trace};

use crate::{
    concurrency::{BoxFuture, fan_out, partition},
    context::Context,
    error::TaskError,
    task::{Operation, Operations},
};

pub const MIN_ORDER: Order = 0;
pub const MAX_ORDER: Order = 100;

#[inline]
pub fn clamp_order(order: Order) -> Order {
    order.clamp(MIN_ORDER, MAX_ORDER)
}

/// Operations sharing one clamped order.
#[derive(Debug)]
pub struct Group {
    pub order: Order,
    pub operations: Operations,
}

/// Clamp, stable-sort and partition operations into ascending groups.
pub fn group_operations(mut ops: Operations) -> Vec<Group> {
    for op in &mut ops {
        op.order = clamp_order(op.order);
    }
    ops.sort_by_key(|op| op.order);

    let mut groups: Vec<Group> = Vec::new();
    for op in ops {
        match groups.last_mut() {
            Some(g) if g.order == op.order => g.operations.push(op),
            _ => groups.push(Group {
                order: op.order,
                operations: vec![op],
            }),
        }
    }
    groups
}

/// Execute operations group by group.
///
/// Operations within a group run concurrently and are all joined before the next group
/// starts. The first group with any failure stops the run; its errors are returned together.
#[instrument(level = "debug", skip_all, fields(plugin = ?ctx.plugin(), ops = ops.len()))]
pub async fn execute_operations(ctx: &Context, ops: Operations) -> Result<(), TaskError> {
    for group in group_operations(ops) {
        let order = group.order;
        trace!(order, size = group.operations.len(), "running operation group");

        let units: Vec<BoxFuture<Result<(), TaskError>>> = group
            .operations
            .into_iter()
            .map(|op| spawn_unit(ctx, op))
            .collect();

        let (_, errors) = partition(fan_out(units).await);
        if !errors.is_empty() {
            debug!(order, failed = errors.len(), "operation group failed");
            return Err(TaskError::Group {
                order,
                source: Box::new(errors.into_error()),
            });
        }
    }
    Ok(())
}

fn spawn_unit(ctx: &Context, op: Operation) -> BoxFuture<Result<(), TaskError>> {
    let ctx = ctx.clone();
    let action = Arc::clone(&op.action);
    Box::pin(async move { action.call(&ctx).await })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use stagehand_store::MemoryKv;

    use super::*;

    fn ctx() -> Context {
        Context::new(Arc::new(MemoryKv::new()))
    }

    fn record(order: Order, log: &Arc<Mutex<Vec<Order>>>) -> Operation {
        let log = Arc::clone(log);
        Operation::new(order, move |_| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(order);
                Ok(())
            }
        })
    }

    #[test]
    fn clamping_merges_out_of_range_orders() {
        let noop = |order| Operation::new(order, |_| async { Ok(()) });
        let groups = group_operations(vec![noop(150), noop(-5), noop(50), noop(0), noop(100)]);

        let shape: Vec<(Order, usize)> =
            groups.iter().map(|g| (g.order, g.operations.len())).collect();
        assert_eq!(shape, vec![(0, 2), (50, 1), (100, 2)]);
    }

    #[tokio::test]
    async fn groups_run_in_ascending_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ops = vec![record(70, &log), record(10, &log), record(40, &log)];

        execute_operations(&ctx(), ops).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![10, 40, 70]);
    }

    #[tokio::test]
    async fn failing_group_stops_later_groups() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ops = vec![
            Operation::new(10, |_| async { Err(TaskError::failed("tag exists")) }),
            record(10, &log),
            record(30, &log),
        ];

        let err = execute_operations(&ctx(), ops).await.unwrap_err();
        match err {
            TaskError::Group { order, source } => {
                assert_eq!(order, 10);
                assert_eq!(source.to_string(), "tag exists");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*log.lock().unwrap(), vec![10]);
    }

    #[tokio::test]
    async fn every_failure_in_a_group_is_reported() {
        let ops = vec![
            Operation::new(10, |_| async { Err(TaskError::failed("a")) }),
            Operation::new(10, |_| async { Err(TaskError::failed("b")) }),
        ];
        let err = execute_operations(&ctx(), ops).await.unwrap_err();
        assert_eq!(err.to_string(), "operations at order 10 failed: a; b");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn group_members_run_concurrently() {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let sleeper = |spans: &Arc<Mutex<Vec<(Instant, Instant)>>>| {
            let spans = Arc::clone(spans);
            Operation::new(10, move |_| {
                let spans = Arc::clone(&spans);
                async move {
                    let start = Instant::now();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    spans.lock().unwrap().push((start, Instant::now()));
                    Ok(())
                }
            })
        };

        execute_operations(&ctx(), vec![sleeper(&spans), sleeper(&spans)])
            .await
            .unwrap();

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 2);
        let first_end = spans.iter().map(|s| s.1).min().unwrap();
        assert!(spans.iter().all(|s| s.0 < first_end));
    }
}
