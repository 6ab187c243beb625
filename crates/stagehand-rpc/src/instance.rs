use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use stagehand_core::{Context, Operations, Stage, Task, TaskError, schedule::clamp_order};
use stagehand_model::TaskRef;
use uuid::Uuid;

/// A live task instance and the context it was prepared under.
pub struct Instance {
    pub task: Arc<dyn Task>,
    pub ctx: Context,
    /// Operations produced by the last prepare call of each prioritized stage.
    pending: Mutex<HashMap<Stage, Operations>>,
}

impl Instance {
    fn new(task: Arc<dyn Task>, ctx: Context) -> Self {
        Self {
            task,
            ctx,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn stash(&self, stage: Stage, ops: Operations) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stage, ops);
    }

    /// Operations stashed for `stage` whose order matches `order`.
    pub fn stashed(&self, stage: Stage, order: i32) -> Operations {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stage)
            .map(|ops| {
                ops.iter()
                    .filter(|op| clamp_order(op.order) == order)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Server-side table of live instances: task name, then instance id.
#[derive(Clone, Default)]
pub struct InstanceTable {
    inner: Arc<RwLock<HashMap<String, HashMap<String, Arc<Instance>>>>>,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an instance under a freshly minted, time-ordered id.
    pub fn insert(&self, name: &str, task: Arc<dyn Task>, ctx: Context) -> TaskRef {
        let id = Uuid::now_v7().to_string();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .entry(name.to_string())
            .or_default()
            .insert(id.clone(), Arc::new(Instance::new(task, ctx)));
        TaskRef::new(name, id)
    }

    pub fn get(&self, task: &TaskRef) -> Result<Arc<Instance>, TaskError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .get(&task.name)
            .and_then(|by_id| by_id.get(&task.instance))
            .cloned()
            .ok_or_else(|| not_found(task))
    }

    /// Remove an instance; later lookups with the same reference fail.
    pub fn remove(&self, task: &TaskRef) -> Result<Arc<Instance>, TaskError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let by_id = inner.get_mut(&task.name).ok_or_else(|| not_found(task))?;
        let instance = by_id.remove(&task.instance).ok_or_else(|| not_found(task))?;
        if by_id.is_empty() {
            inner.remove(&task.name);
        }
        Ok(instance)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn not_found(task: &TaskRef) -> TaskError {
    TaskError::NotFound {
        task: task.name.clone(),
        instance: task.instance.clone(),
    }
}
