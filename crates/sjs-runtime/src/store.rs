use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rhai::{Array, Dynamic, Engine};
use sjs_core::{SjsError, Value};

use crate::bridge::{dynamic_to_value, value_to_dynamic, Exporter, OpaqueValues};
use crate::error_map::lock;

/// A script-writable key/value store shared by handle.
///
/// Clones alias the same entries, so a write made through `context` inside a
/// script is visible to the template pass that exports the store afterwards.
/// Scripts read and write entries with `store.Key` or `store["Key"]`.
#[derive(Debug, Clone, Default)]
pub struct ComputedStore {
    entries: Arc<Mutex<BTreeMap<String, Dynamic>>>,
}

impl ComputedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Dynamic> {
        lock(&self.entries).get(key).cloned()
    }

    pub fn get_value(&self, key: &str) -> Result<Option<Value>, SjsError> {
        self.get(key).map(dynamic_to_value).transpose()
    }

    pub fn set(&self, key: impl Into<String>, value: Dynamic) {
        lock(&self.entries).insert(key.into(), value);
    }

    pub fn set_value(&self, key: impl Into<String>, value: &Value) {
        self.set(key, value_to_dynamic(value));
    }

    pub fn remove(&self, key: &str) -> Option<Dynamic> {
        lock(&self.entries).remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn same_store(&self, other: &ComputedStore) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Exports every entry; fails on the first one with no plain-data form.
    pub fn export(&self) -> Result<Value, SjsError> {
        Exporter::new(OpaqueValues::Reject).export_store(self)
    }

    /// Exports every entry, reading functions and other opaque values as
    /// null so one such entry does not hide the rest of the store.
    pub fn export_lossy(&self) -> Value {
        Exporter::new(OpaqueValues::Null)
            .export_store(self)
            .unwrap_or_default()
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, Dynamic> {
        lock(&self.entries).clone()
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.entries) as usize
    }
}

pub(crate) fn register_store_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<ComputedStore>("ComputedStore")
        .register_indexer_get(|store: &mut ComputedStore, key: &str| -> Dynamic {
            store.get(key).unwrap_or(Dynamic::UNIT)
        })
        .register_indexer_set(|store: &mut ComputedStore, key: &str, value: Dynamic| {
            store.set(key, value);
        })
        .register_fn("contains", |store: &mut ComputedStore, key: &str| -> bool {
            store.get(key).is_some()
        })
        .register_fn("remove", |store: &mut ComputedStore, key: &str| -> Dynamic {
            store.remove(key).unwrap_or(Dynamic::UNIT)
        })
        .register_fn("keys", |store: &mut ComputedStore| -> Array {
            store.keys().into_iter().map(Dynamic::from).collect()
        })
        .register_fn("len", |store: &mut ComputedStore| -> rhai::INT {
            store.len() as rhai::INT
        })
        .register_fn("to_string", |store: &mut ComputedStore| -> String {
            format!("ComputedStore({})", store.keys().join(", "))
        });
}
