use std::fmt;

use thiserror::Error;

use crate::task::Stage;

#[derive(Debug, Error)]
pub enum TaskError {
    /// The plugin does not implement the requested task or goal. Filtered out during
    /// resolution rather than reported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<TaskError>,
    },

    #[error("operations at order {order} failed: {source}")]
    Group {
        order: i32,
        #[source]
        source: Box<TaskError>,
    },

    #[error("plugin {plugin}: {source}")]
    Member {
        plugin: String,
        #[source]
        source: Box<TaskError>,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("task instance not found: {task}#{instance}")]
    NotFound { task: String, instance: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("task is closed")]
    Closed,

    /// A stage helper was handed a stage of the other kind.
    #[error("{0} stage cannot be {how}", how = misuse(.0))]
    WrongStage(Stage),

    #[error("unit of work panicked: {0}")]
    Panicked(String),

    #[error("store error: {0}")]
    Store(#[from] stagehand_store::StoreError),

    #[error("model error: {0}")]
    Model(#[from] stagehand_model::ModelError),
}

fn misuse(stage: &Stage) -> &'static str {
    if stage.is_prioritized() {
        "called directly"
    } else {
        "collected"
    }
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    /// Whether this error, or an error it wraps, is a reference-not-found condition.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Stage { source, .. } | Self::Group { source, .. } | Self::Member { source, .. } => {
                source.is_not_found()
            }
            Self::Aggregate(agg) => agg.errors().iter().any(TaskError::is_not_found),
            _ => false,
        }
    }

    pub fn at_stage(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    pub fn for_member(self, plugin: &str) -> Self {
        Self::Member {
            plugin: plugin.to_string(),
            source: Box::new(self),
        }
    }
}

/// Every error raised by one fan-out or one operation group.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<TaskError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: TaskError) {
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[TaskError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok` when empty, the sole error when there is one, the aggregate otherwise.
    pub fn into_result(self) -> Result<(), TaskError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.into_error())
        }
    }

    /// The sole error when there is exactly one, the aggregate otherwise.
    pub fn into_error(mut self) -> TaskError {
        if self.errors.len() == 1 {
            self.errors.remove(0)
        } else {
            TaskError::Aggregate(self)
        }
    }
}

impl FromIterator<TaskError> for AggregateError {
    fn from_iter<I: IntoIterator<Item = TaskError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl Extend<TaskError> for AggregateError {
    fn extend<I: IntoIterator<Item = TaskError>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
