use std::{fmt, sync::Arc};

use async_trait::async_trait;
use stagehand_model::{GoalDescription, TaskDescription};
use thiserror::Error;

use crate::{context::Context, error::TaskError, task::Task};

/// A source of task implementations: a local plugin, a remote plugin process, or the
/// master aggregating several of them.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Every task this plugin can prepare.
    async fn implements(&self) -> Result<Vec<TaskDescription>, TaskError>;

    /// Describe a goal. [`TaskError::Unsupported`] when the plugin knows nothing about it.
    async fn goal(&self, name: &str) -> Result<GoalDescription, TaskError>;

    /// Create a task instance for `task`. [`TaskError::Unsupported`] when not implemented.
    async fn prepare(&self, task: &str, ctx: &Context) -> Result<Arc<dyn Task>, PrepareError>;
}

/// A failed prepare.
///
/// When `task` is present the instance exists despite the failure and the caller must
/// cancel it before discarding it.
#[derive(Error)]
#[error("{error}")]
pub struct PrepareError {
    pub error: TaskError,
    pub task: Option<Arc<dyn Task>>,
}

impl PrepareError {
    pub fn with_task(error: TaskError, task: Arc<dyn Task>) -> Self {
        Self {
            error,
            task: Some(task),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        self.task.is_none() && self.error.is_unsupported()
    }
}

impl From<TaskError> for PrepareError {
    fn from(error: TaskError) -> Self {
        Self { error, task: None }
    }
}

impl fmt::Debug for PrepareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrepareError")
            .field("error", &self.error)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}
