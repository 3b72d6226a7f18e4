use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use sjs_core::{ErrorKind, SjsError, Value};
use sjs_runtime::lock;

/// A function callable from templates.
pub type TemplateFunction = Arc<dyn Fn(&[Value]) -> Result<Value, SjsError> + Send + Sync>;

/// The engine's template function table.
///
/// Names are unique: registering a taken name fails until it is
/// unregistered. Builtins are reserved for the table's lifetime.
#[derive(Default)]
pub struct TemplateFunctionTable {
    functions: Mutex<BTreeMap<String, TemplateFunction>>,
    reserved: Mutex<BTreeSet<String>>,
}

impl fmt::Debug for TemplateFunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateFunctionTable")
            .field("functions", &lock(&self.functions).keys().collect::<Vec<_>>())
            .field("reserved", &*lock(&self.reserved))
            .finish()
    }
}

impl TemplateFunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reserved(names: &[&str]) -> Self {
        Self {
            functions: Mutex::new(BTreeMap::new()),
            reserved: Mutex::new(names.iter().map(|name| name.to_string()).collect()),
        }
    }

    /// Reserves `name` without a function behind it. The renderer supplies
    /// such names itself for every pass.
    pub fn reserve(&self, name: &str) -> Result<(), SjsError> {
        if self.contains(name) {
            return Err(SjsError::reserved(name, "a template function with this name already exists"));
        }
        lock(&self.reserved).insert(name.to_string());
        Ok(())
    }

    pub fn register_builtin(&self, name: &str, function: TemplateFunction) -> Result<(), SjsError> {
        self.register(name, function)?;
        lock(&self.reserved).insert(name.to_string());
        Ok(())
    }

    pub fn register(&self, name: &str, function: TemplateFunction) -> Result<(), SjsError> {
        if name.is_empty() {
            return Err(SjsError::new(
                ErrorKind::InvalidArgument,
                "INVALID_ARGUMENT",
                "template function name cannot be empty",
            ));
        }
        if lock(&self.reserved).contains(name) {
            return Err(SjsError::reserved(name, "builtin template function"));
        }
        let mut functions = lock(&self.functions);
        if functions.contains_key(name) {
            return Err(SjsError::reserved(
                name,
                "a template function with this name already exists",
            ));
        }
        functions.insert(name.to_string(), function);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<(), SjsError> {
        if lock(&self.reserved).contains(name) {
            return Err(SjsError::reserved(name, "builtin template functions cannot be removed"));
        }
        match lock(&self.functions).remove(name) {
            Some(_) => Ok(()),
            None => Err(SjsError::new(
                ErrorKind::ReservedName,
                "TEMPLATE_FUNC_MISSING",
                format!("template function {} does not exist", name),
            )),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.reserved).contains(name) || lock(&self.functions).contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.functions).keys().cloned().collect()
    }

    /// Copies the table so a pass can run without holding its lock.
    pub fn snapshot(&self) -> Vec<(String, TemplateFunction)> {
        lock(&self.functions)
            .iter()
            .map(|(name, function)| (name.clone(), Arc::clone(function)))
            .collect()
    }
}

#[cfg(test)]
mod functions_tests {
    use super::*;

    fn constant(value: i64) -> TemplateFunction {
        Arc::new(move |_args: &[Value]| -> Result<Value, SjsError> { Ok(Value::Int(value)) })
    }

    #[test]
    fn duplicate_registration_is_rejected_until_unregistered() {
        let table = TemplateFunctionTable::new();
        table.register("shout", constant(1)).expect("first register should pass");
        let error = table
            .register("shout", constant(2))
            .expect_err("second register should fail");
        assert_eq!(error.kind, ErrorKind::ReservedName);
        assert_eq!(error.code, "TEMPLATE_FUNC_RESERVED");

        table.unregister("shout").expect("unregister should pass");
        table.register("shout", constant(3)).expect("register after unregister should pass");
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!((snapshot[0].1)(&[]).expect("call"), Value::Int(3));
    }

    #[test]
    fn unregistering_an_unknown_name_fails() {
        let table = TemplateFunctionTable::new();
        let error = table.unregister("ghost").expect_err("missing name should fail");
        assert_eq!(error.kind, ErrorKind::ReservedName);
        assert_eq!(error.code, "TEMPLATE_FUNC_MISSING");
    }

    #[test]
    fn builtins_and_reserved_names_are_fixed() {
        let table = TemplateFunctionTable::with_reserved(&["recurse"]);
        table.reserve("include").expect("reserve should pass");
        assert!(table.register("include", constant(1)).is_err());
        table
            .register_builtin("templateFile", constant(0))
            .expect("builtin should register");
        assert!(table.register("recurse", constant(1)).is_err());
        assert!(table.register("templateFile", constant(1)).is_err());
        assert!(table.unregister("templateFile").is_err());
        assert!(table.reserve("templateFile").is_err());
        assert!(table.contains("recurse"));
        assert_eq!(table.names(), vec!["templateFile".to_string()]);
    }
}
