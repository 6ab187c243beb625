mod task_path;
pub use task_path::TaskPath;

mod goal;
pub use goal::{GoalDescription, builtin_goals};

mod task;
pub use task::TaskDescription;

mod task_ref;
pub use task_ref::TaskRef;

mod dependency;
pub use dependency::dependency_order;

/// Priority of an operation within one stage.
///
/// Conventionally in `[0, 100]`; out-of-range values are clamped by the scheduler.
pub type Order = i32;
