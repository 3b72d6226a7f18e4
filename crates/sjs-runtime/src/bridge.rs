use std::collections::BTreeMap;

use rhai::{Array, Dynamic, ImmutableString, Map, FLOAT, INT};
use sjs_core::{SjsError, Value};
use tracing::trace;

use crate::store::ComputedStore;

pub fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(value) => Dynamic::from_bool(*value),
        Value::Int(value) => Dynamic::from_int(*value),
        Value::Float(value) => Dynamic::from_float(*value),
        Value::String(value) => Dynamic::from(value.clone()),
        Value::Array(values) => {
            Dynamic::from_array(values.iter().map(value_to_dynamic).collect::<Array>())
        }
        Value::Map(values) => {
            let mut map = Map::new();
            for (key, value) in values {
                map.insert(key.as_str().into(), value_to_dynamic(value));
            }
            Dynamic::from_map(map)
        }
    }
}

/// Exports a script value into the neutral [`Value`] form.
///
/// Shared (captured) values are flattened first; computed stores export as
/// maps. Functions and other opaque runtime handles are rejected.
pub fn dynamic_to_value(value: Dynamic) -> Result<Value, SjsError> {
    Exporter::new(OpaqueValues::Reject).export(value)
}

/// What an export does with a value that has no plain-data form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpaqueValues {
    Reject,
    Null,
}

/// Walks a script value. A store that is reached again while it is still
/// being exported (a store holding itself, directly or through a container)
/// exports as null at the point of the repeat.
pub(crate) struct Exporter {
    opaque: OpaqueValues,
    open_stores: Vec<usize>,
}

impl Exporter {
    pub(crate) fn new(opaque: OpaqueValues) -> Self {
        Self {
            opaque,
            open_stores: Vec::new(),
        }
    }

    pub(crate) fn export(&mut self, value: Dynamic) -> Result<Value, SjsError> {
        let value = value.flatten();

        if value.is_unit() {
            return Ok(Value::Null);
        }
        if value.is::<bool>() {
            return Ok(Value::Bool(value.cast::<bool>()));
        }
        if value.is::<INT>() {
            return Ok(Value::Int(value.cast::<INT>()));
        }
        if value.is::<FLOAT>() {
            return Ok(Value::Float(value.cast::<FLOAT>()));
        }
        if value.is::<ImmutableString>() {
            return Ok(Value::String(value.cast::<ImmutableString>().to_string()));
        }
        if value.is::<char>() {
            return Ok(Value::String(value.cast::<char>().to_string()));
        }
        if value.is::<Array>() {
            let array = value.cast::<Array>();
            let mut out = Vec::with_capacity(array.len());
            for item in array {
                out.push(self.export(item)?);
            }
            return Ok(Value::Array(out));
        }
        if value.is::<Map>() {
            let map = value.cast::<Map>();
            let mut out = BTreeMap::new();
            for (key, value) in map {
                out.insert(key.to_string(), self.export(value)?);
            }
            return Ok(Value::Map(out));
        }
        if value.is::<ComputedStore>() {
            return self.export_store(&value.cast::<ComputedStore>());
        }

        match self.opaque {
            OpaqueValues::Null => {
                trace!(type_name = value.type_name(), "opaque script value exported as null");
                Ok(Value::Null)
            }
            OpaqueValues::Reject => Err(SjsError::runtime(
                "SCRIPT_VALUE_UNSUPPORTED",
                format!(
                    "script value of type \"{}\" cannot cross into template data",
                    value.type_name()
                ),
            )),
        }
    }

    pub(crate) fn export_store(&mut self, store: &ComputedStore) -> Result<Value, SjsError> {
        let id = store.id();
        if self.open_stores.contains(&id) {
            trace!("computed store cycle exported as null");
            return Ok(Value::Null);
        }
        self.open_stores.push(id);
        let mut out = BTreeMap::new();
        let mut result = Ok(());
        for (key, value) in store.snapshot() {
            match self.export(value) {
                Ok(value) => {
                    out.insert(key, value);
                }
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
        self.open_stores.pop();
        result.map(|()| Value::Map(out))
    }
}
