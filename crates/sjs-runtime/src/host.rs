use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult};
use sjs_core::{SjsError, Value};

use crate::bridge::{dynamic_to_value, value_to_dynamic};
use crate::error_map::into_rhai_error;

/// Native functions callable from scripts by name.
pub trait HostFunctionRegistry: Send + Sync {
    fn call(&self, name: &str, args: &[Value]) -> Result<Value, SjsError>;
    fn names(&self) -> &[String];
}

#[derive(Debug, Default)]
pub struct EmptyHostFunctionRegistry {
    names: Vec<String>,
}

impl HostFunctionRegistry for EmptyHostFunctionRegistry {
    fn call(&self, name: &str, _args: &[Value]) -> Result<Value, SjsError> {
        Err(SjsError::runtime(
            "SCRIPT_FUNCTION_NOT_FOUND",
            format!("host function registry is empty, cannot call {}", name),
        ))
    }

    fn names(&self) -> &[String] {
        &self.names
    }
}

fn call_host(
    registry: &dyn HostFunctionRegistry,
    name: &str,
    args: Vec<Dynamic>,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let args = args
        .into_iter()
        .map(dynamic_to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(into_rhai_error)?;
    registry
        .call(name, &args)
        .map(|value| value_to_dynamic(&value))
        .map_err(into_rhai_error)
}

macro_rules! register_host_arity {
    ($engine:expr, $registry:expr, $name:expr $(, $arg:ident)*) => {{
        let registry = Arc::clone($registry);
        let name = $name.to_string();
        $engine.register_fn(
            $name,
            move |$($arg: Dynamic),*| -> Result<Dynamic, Box<EvalAltResult>> {
                call_host(registry.as_ref(), &name, vec![$($arg),*])
            },
        );
    }};
}

/// Registers every registry function for zero to four arguments.
pub(crate) fn register_host_functions(engine: &mut Engine, registry: &Arc<dyn HostFunctionRegistry>) {
    for name in registry.names() {
        let name = name.as_str();
        register_host_arity!(engine, registry, name);
        register_host_arity!(engine, registry, name, a);
        register_host_arity!(engine, registry, name, a, b);
        register_host_arity!(engine, registry, name, a, b, c);
        register_host_arity!(engine, registry, name, a, b, c, d);
    }
}
