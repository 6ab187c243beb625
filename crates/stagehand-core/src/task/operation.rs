use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use stagehand_model::Order;

use crate::{context::Context, error::TaskError};

pub type Operations = Vec<Operation>;

/// Body of an operation.
#[async_trait]
pub trait Action: Send + Sync {
    async fn call(&self, ctx: &Context) -> Result<(), TaskError>;
}

struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn call(&self, ctx: &Context) -> Result<(), TaskError> {
        (self.0)(ctx.clone()).await
    }
}

/// A priority-tagged action emitted by a prioritized stage.
#[derive(Clone)]
pub struct Operation {
    pub order: Order,
    pub action: Arc<dyn Action>,
}

impl Operation {
    pub fn new<F, Fut>(order: Order, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            order,
            action: Arc::new(FnAction(f)),
        }
    }

    pub fn from_action(order: Order, action: Arc<dyn Action>) -> Self {
        Self { order, action }
    }

    pub async fn call(&self, ctx: &Context) -> Result<(), TaskError> {
        self.action.call(ctx).await
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").field("order", &self.order).finish()
    }
}
