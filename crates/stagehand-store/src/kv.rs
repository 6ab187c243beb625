use std::{collections::BTreeMap, time::Duration};

use time::OffsetDateTime;

use crate::value::Value;

/// Flat set of changed keys, as exchanged between stores.
pub type Delta = BTreeMap<String, Value>;

/// Key/value property store.
///
/// Reads never fail: a missing key is `None` from [`Kv::get`] and the zero value from the
/// typed getters in [`KvExt`]. Callers that need presence must ask [`Kv::is_set`].
///
/// All methods take `&self`; implementations synchronize internally so a store can be
/// shared between concurrently running operations.
pub trait Kv: Send + Sync {
    /// Look up a key. A prefix whose children are set yields a [`Value::Map`] of them.
    fn get(&self, key: &str) -> Option<Value>;

    fn is_set(&self, key: &str) -> bool;

    /// Every flat key, sorted.
    fn keys(&self) -> Vec<String>;

    /// Flat snapshot of every key.
    fn all_settings(&self) -> Delta {
        self.keys()
            .into_iter()
            .filter_map(|k| self.get(&k).map(|v| (k, v)))
            .collect()
    }

    fn set(&self, key: &str, value: Value);

    fn update(&self, values: Delta);

    /// Drop every value this store owns.
    ///
    /// Views over another store ([`SubKv`](crate::SubKv)) own nothing and leave the
    /// underlying store untouched; there is no per-key removal to clear a section with.
    fn clear(&self);

    /// Make `alias` resolve through `key`.
    fn register_alias(&self, alias: &str, key: &str);
}

/// Typed getters with zero-value defaults.
pub trait KvExt: Kv {
    fn get_string(&self, key: &str) -> String {
        self.get(key).map(|v| v.as_string()).unwrap_or_default()
    }

    fn get_bool(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v.as_bool())
    }

    fn get_int(&self, key: &str) -> i64 {
        self.get(key).map(|v| v.as_int()).unwrap_or_default()
    }

    fn get_float(&self, key: &str) -> f64 {
        self.get(key).map(|v| v.as_float()).unwrap_or_default()
    }

    fn get_duration(&self, key: &str) -> Duration {
        self.get(key).map(|v| v.as_duration()).unwrap_or_default()
    }

    fn get_time(&self, key: &str) -> OffsetDateTime {
        self.get(key)
            .map(|v| v.as_time())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    fn get_list(&self, key: &str) -> Vec<Value> {
        self.get(key).map(|v| v.as_list()).unwrap_or_default()
    }

    fn get_string_list(&self, key: &str) -> Vec<String> {
        self.get_list(key).iter().map(Value::as_string).collect()
    }

    fn get_map(&self, key: &str) -> BTreeMap<String, Value> {
        self.get(key).map(|v| v.as_map()).unwrap_or_default()
    }

    fn set_value(&self, key: &str, value: impl Into<Value>) {
        self.set(key, value.into());
    }
}

impl<K: Kv + ?Sized> KvExt for K {}
