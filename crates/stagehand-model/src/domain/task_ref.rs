use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle to a task instance owned by a plugin process.
///
/// `instance` is minted fresh for every prepare call and stops resolving once the task is
/// cancelled or completed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub name: String,
    pub instance: String,
}

impl TaskRef {
    pub fn new(name: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: instance.into(),
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.instance)
    }
}
