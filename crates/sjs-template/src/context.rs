use std::sync::{Arc, Mutex};

use sjs_core::{SjsError, Value};
use sjs_runtime::{lock, value_to_dynamic, ComputedStore, Dynamic, Map};

use crate::recursion::RecursionSignal;

/// Name under which scripts see the current context.
pub const CONTEXT_BINDING: &str = "context";

/// State shared by the scripts and templates of one invocation.
#[derive(Debug, Clone)]
pub struct Context {
    pub global: Arc<Value>,
    pub global_computed: ComputedStore,
    pub local: Value,
    pub local_computed: ComputedStore,
    pub recursive_computed: Option<ComputedStore>,
    pub recursion: RecursionSignal,
}

impl Context {
    /// The outermost context, created once when the engine is initialized.
    pub fn root(global: Value) -> Self {
        Self {
            global: Arc::new(global),
            global_computed: ComputedStore::new(),
            local: Value::Null,
            local_computed: ComputedStore::new(),
            recursive_computed: None,
            recursion: RecursionSignal::disabled(),
        }
    }

    /// Context for an invocation nested inside this one. Global state is
    /// shared; local data and the local store are fresh. The recursive store
    /// is inherited unless the nested body starts its own cycle.
    pub fn nested(&self, local: Value, recursion: RecursionSignal) -> Self {
        let recursive_computed = if recursion.is_enabled() {
            Some(ComputedStore::new())
        } else {
            self.recursive_computed.clone()
        };
        Self {
            global: Arc::clone(&self.global),
            global_computed: self.global_computed.clone(),
            local,
            local_computed: ComputedStore::new(),
            recursive_computed,
            recursion,
        }
    }

    /// The `context` map handed to scripts. Data tiers are copies; computed
    /// stores are live handles.
    pub fn to_script(&self) -> Dynamic {
        let mut map = Map::new();
        map.insert("Global".into(), value_to_dynamic(&self.global));
        map.insert("Local".into(), value_to_dynamic(&self.local));
        map.insert(
            "GlobalComputed".into(),
            Dynamic::from(self.global_computed.clone()),
        );
        map.insert(
            "LocalComputed".into(),
            Dynamic::from(self.local_computed.clone()),
        );
        map.insert(
            "RecursiveComputed".into(),
            self.recursive_computed
                .clone()
                .map(Dynamic::from)
                .unwrap_or(Dynamic::UNIT),
        );
        Dynamic::from_map(map)
    }

    /// Flattened plain data for the template executor. Store entries that
    /// templates cannot read, such as script functions, come through as null.
    pub fn template_data(&self) -> Value {
        let recursive = match &self.recursive_computed {
            Some(store) => store.export_lossy(),
            None => Value::map(Vec::<(String, Value)>::new()),
        };
        Value::map([
            ("Global", self.global.as_ref().clone()),
            ("Local", self.local.clone()),
            ("GlobalComputed", self.global_computed.export_lossy()),
            ("LocalComputed", self.local_computed.export_lossy()),
            ("RecursiveComputed", recursive),
        ])
    }
}

/// Holds the current context. Entering installs a new one and the returned
/// guard puts the previous one back when dropped, on every exit path.
#[derive(Debug, Default)]
pub struct ContextManager {
    current: Mutex<Option<Arc<Context>>>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<Context>> {
        lock(&self.current).clone()
    }

    pub fn require_current(&self) -> Result<Arc<Context>, SjsError> {
        self.current().ok_or_else(SjsError::not_initialized)
    }

    pub fn enter(&self, context: Context) -> ContextGuard<'_> {
        let context = Arc::new(context);
        let previous = lock(&self.current).replace(Arc::clone(&context));
        ContextGuard {
            manager: self,
            previous,
            context,
        }
    }

    /// Installs `context` with no previous context to return to.
    pub fn install(&self, context: Context) {
        *lock(&self.current) = Some(Arc::new(context));
    }

    /// Drops the current context, leaving the manager uninitialized.
    pub fn clear(&self) {
        lock(&self.current).take();
    }
}

pub struct ContextGuard<'a> {
    manager: &'a ContextManager,
    previous: Option<Arc<Context>>,
    context: Arc<Context>,
}

impl ContextGuard<'_> {
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.manager.current) = self.previous.take();
    }
}
