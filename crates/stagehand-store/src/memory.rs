use std::{
    collections::{BTreeMap, HashMap},
    sync::{PoisonError, RwLock},
};

use crate::{
    error::StoreError,
    kv::{Delta, Kv},
    value::Value,
};

/// Upper bound on alias hops; protects lookups from alias cycles.
const MAX_ALIAS_HOPS: usize = 16;

/// In-memory leaf store holding flat dotted keys.
///
/// Setting a [`Value::Map`] flattens it into dotted keys, so snapshots taken with
/// [`Kv::all_settings`] are always flat.
#[derive(Default)]
pub struct MemoryKv {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    values: BTreeMap<String, Value>,
    aliases: HashMap<String, String>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `values` (nested maps are flattened).
    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let kv = Self::new();
        {
            let mut inner = kv.inner.write().unwrap_or_else(PoisonError::into_inner);
            for (k, v) in values {
                let key = k.into();
                flatten_into(&mut inner.values, key, v);
            }
        }
        kv
    }

    /// Build a store from a JSON object document.
    pub fn from_json_str(json: &str) -> Result<Self, StoreError> {
        let doc: serde_json::Value = serde_json::from_str(json)?;
        match Value::from_json(doc) {
            Some(Value::Map(entries)) => Ok(Self::with_values(entries)),
            _ => Err(StoreError::InvalidSnapshot(
                "top-level document must be an object".into(),
            )),
        }
    }

    /// Remove and return every value in one step.
    pub fn take(&self) -> Delta {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut inner.values)
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.values.is_empty()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.values.len()
    }
}

impl MemoryInner {
    fn resolve(&self, key: &str) -> String {
        let mut current = key;
        for _ in 0..MAX_ALIAS_HOPS {
            match self.aliases.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.to_string()
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.values.get(key) {
            return Some(v.clone());
        }

        let prefix = format!("{key}.");
        let mut nested = BTreeMap::new();
        for (k, v) in self.values.range(prefix.clone()..) {
            let Some(rest) = k.strip_prefix(&prefix) else {
                break;
            };
            insert_nested(&mut nested, rest, v.clone());
        }

        if nested.is_empty() {
            None
        } else {
            Some(Value::Map(nested))
        }
    }
}

fn flatten_into(values: &mut BTreeMap<String, Value>, key: String, value: Value) {
    match value {
        Value::Map(entries) => {
            for (k, v) in entries {
                flatten_into(values, format!("{key}.{k}"), v);
            }
        }
        scalar => {
            values.insert(key, scalar);
        }
    }
}

fn insert_nested(map: &mut BTreeMap<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, tail)) => {
            let slot = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            if !matches!(slot, Value::Map(_)) {
                *slot = Value::Map(BTreeMap::new());
            }
            if let Value::Map(child) = slot {
                insert_nested(child, tail, value);
            }
        }
    }
}

impl Kv for MemoryKv {
    fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let key = inner.resolve(key);
        inner.lookup(&key)
    }

    fn is_set(&self, key: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let key = inner.resolve(key);
        if inner.values.contains_key(&key) {
            return true;
        }
        let prefix = format!("{key}.");
        inner
            .values
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn keys(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.values.keys().cloned().collect()
    }

    fn all_settings(&self) -> Delta {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.values.clone()
    }

    fn set(&self, key: &str, value: Value) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let key = inner.resolve(key);
        flatten_into(&mut inner.values, key, value);
    }

    fn update(&self, values: Delta) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for (k, v) in values {
            let key = inner.resolve(&k);
            flatten_into(&mut inner.values, key, v);
        }
    }

    fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.values.clear();
    }

    fn register_alias(&self, alias: &str, key: &str) {
        if alias == key {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.aliases.insert(alias.to_string(), key.to_string());
    }
}
