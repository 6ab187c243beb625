pub mod error;
pub use error::{AggregateError, TaskError};

pub mod context;
pub use context::Context;

pub mod task;
pub use task::{Action, Operation, Operations, Stage, Task};

pub mod schedule;
pub use schedule::execute_operations;

pub mod concurrency;

pub mod plugin;
pub use plugin::{Plugin, PrepareError};

pub mod master;
pub use master::{CompositeTask, Master};

pub mod lifecycle;
pub use lifecycle::execute;

pub mod run;
pub use run::{run, run_with_requirements};

pub mod config;
pub use config::Config;
