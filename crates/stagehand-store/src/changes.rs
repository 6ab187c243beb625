use std::{collections::BTreeSet, sync::Arc};

use crate::{
    kv::{Delta, Kv},
    memory::MemoryKv,
    value::Value,
};

/// Change-tracking overlay.
///
/// Reads prefer the recorded changes over the inner store; writes only touch the changes.
/// [`TrackedKv::drain_changes`] hands out the accumulated delta and clears it in one step,
/// which is what gets shipped across process boundaries instead of the full store.
pub struct TrackedKv {
    inner: Arc<dyn Kv>,
    changes: MemoryKv,
}

impl TrackedKv {
    pub fn new(inner: Arc<dyn Kv>) -> Self {
        Self {
            inner,
            changes: MemoryKv::new(),
        }
    }

    pub fn inner(&self) -> &Arc<dyn Kv> {
        &self.inner
    }

    /// Copy of the changes recorded so far.
    pub fn changes(&self) -> Delta {
        self.changes.all_settings()
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Return the recorded changes and forget them.
    pub fn drain_changes(&self) -> Delta {
        self.changes.take()
    }

    pub fn clear_changes(&self) {
        self.changes.clear();
    }

    /// Write a delta that originated elsewhere into the inner store.
    ///
    /// Values applied this way are not reported back by [`TrackedKv::drain_changes`].
    pub fn apply_upstream(&self, delta: Delta) {
        if !delta.is_empty() {
            self.inner.update(delta);
        }
    }
}

impl Kv for TrackedKv {
    fn get(&self, key: &str) -> Option<Value> {
        if self.changes.is_set(key) {
            return self.changes.get(key);
        }
        self.inner.get(key)
    }

    fn is_set(&self, key: &str) -> bool {
        self.changes.is_set(key) || self.inner.is_set(key)
    }

    fn keys(&self) -> Vec<String> {
        let mut set: BTreeSet<String> = self.inner.keys().into_iter().collect();
        set.extend(self.changes.keys());
        set.into_iter().collect()
    }

    fn all_settings(&self) -> Delta {
        let mut out = self.inner.all_settings();
        out.extend(self.changes.all_settings());
        out
    }

    fn set(&self, key: &str, value: Value) {
        self.changes.set(key, value);
    }

    fn update(&self, values: Delta) {
        self.changes.update(values);
    }

    fn clear(&self) {
        self.changes.clear();
        self.inner.clear();
    }

    fn register_alias(&self, alias: &str, key: &str) {
        self.changes.register_alias(alias, key);
        self.inner.register_alias(alias, key);
    }
}
