use std::{collections::BTreeSet, sync::Arc};

use crate::{
    error::StoreError,
    kv::{Delta, Kv},
    value::Value,
};

/// Ordered stack of stores, least specific first.
///
/// Reads search from the last (most specific) layer backwards and return the first hit.
/// Writes always land in the last layer.
pub struct LayeredKv {
    layers: Vec<Arc<dyn Kv>>,
}

impl LayeredKv {
    pub fn new(layers: Vec<Arc<dyn Kv>>) -> Result<Self, StoreError> {
        if layers.is_empty() {
            return Err(StoreError::NoLayers);
        }
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[Arc<dyn Kv>] {
        &self.layers
    }

    fn top(&self) -> &Arc<dyn Kv> {
        // `new` rejects an empty stack.
        &self.layers[self.layers.len() - 1]
    }
}

impl Kv for LayeredKv {
    fn get(&self, key: &str) -> Option<Value> {
        self.layers
            .iter()
            .rev()
            .find(|layer| layer.is_set(key))
            .and_then(|layer| layer.get(key))
    }

    fn is_set(&self, key: &str) -> bool {
        self.layers.iter().any(|layer| layer.is_set(key))
    }

    fn keys(&self) -> Vec<String> {
        let set: BTreeSet<String> = self.layers.iter().flat_map(|l| l.keys()).collect();
        set.into_iter().collect()
    }

    fn all_settings(&self) -> Delta {
        let mut out = Delta::new();
        for layer in &self.layers {
            out.extend(layer.all_settings());
        }
        out
    }

    fn set(&self, key: &str, value: Value) {
        self.top().set(key, value);
    }

    fn update(&self, values: Delta) {
        self.top().update(values);
    }

    fn clear(&self) {
        for layer in &self.layers {
            layer.clear();
        }
    }

    fn register_alias(&self, alias: &str, key: &str) {
        for layer in &self.layers {
            layer.register_alias(alias, key);
        }
    }
}
