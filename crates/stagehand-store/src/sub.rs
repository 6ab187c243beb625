use std::sync::Arc;

use crate::{
    kv::{Delta, Kv},
    value::Value,
};

/// Live view of the keys under `prefix.` in another store.
///
/// Reads and writes are forwarded with the prefix re-attached, so a sub-section view
/// stays in sync with the store it was taken from.
pub struct SubKv {
    inner: Arc<dyn Kv>,
    prefix: String,
}

impl SubKv {
    pub fn new(inner: Arc<dyn Kv>, prefix: &str) -> Self {
        Self {
            inner,
            prefix: prefix.trim_end_matches('.').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full(&self, key: &str) -> String {
        format!("{}.{}", self.prefix, key)
    }
}

impl Kv for SubKv {
    fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(&self.full(key))
    }

    fn is_set(&self, key: &str) -> bool {
        self.inner.is_set(&self.full(key))
    }

    fn keys(&self) -> Vec<String> {
        let prefix = format!("{}.", self.prefix);
        self.inner
            .keys()
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    fn set(&self, key: &str, value: Value) {
        self.inner.set(&self.full(key), value);
    }

    fn update(&self, values: Delta) {
        let values = values
            .into_iter()
            .map(|(k, v)| (self.full(&k), v))
            .collect();
        self.inner.update(values);
    }

    /// No-op: the section belongs to the parent store.
    fn clear(&self) {}

    fn register_alias(&self, alias: &str, key: &str) {
        self.inner.register_alias(&self.full(alias), &self.full(key));
    }
}
