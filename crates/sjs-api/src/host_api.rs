use std::sync::Arc;

use rhai::{Dynamic, EvalAltResult, FnPtr, NativeCallContext, INT};
use sjs_core::{ErrorKind, SjsError, Value};
use sjs_runtime::{dynamic_to_value, into_rhai_error, value_to_dynamic, RuntimeBuilder};
use sjs_template::{TemplateFunction, TemplateFunctionTable};
use tracing::debug;

use crate::EngineHandle;

/// Script functions the engine adds on top of the runtime's own.
pub const SCRIPT_HOST_API: &[&str] = &[
    "require",
    "recurse",
    "templateFile",
    "templateString",
    "templateStringInput",
    "registerTemplateFunc",
    "unregisterTemplateFunc",
];

/// Template functions every template sees besides `recurse`.
pub const TEMPLATE_BUILTINS: &[&str] = &["templateFile", "templateString", "templateStringInput"];

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

fn script_data(data: Dynamic) -> ScriptResult<Value> {
    dynamic_to_value(data).map_err(into_rhai_error)
}

pub(crate) fn register_script_api(builder: &mut RuntimeBuilder, handle: &EngineHandle) {
    for name in SCRIPT_HOST_API {
        builder.reserve(*name);
    }
    let engine = builder.engine_mut();

    let require = handle.clone();
    engine.register_fn(
        "require",
        move |call: NativeCallContext, path: &str| -> ScriptResult<Dynamic> {
            let inner = require.get().map_err(into_rhai_error)?;
            let caller = call
                .source()
                .map(|key| inner.renderer.runtime().source_maps().display_name(key));
            inner.require(path, caller.as_deref()).map_err(into_rhai_error)
        },
    );

    let recurse = handle.clone();
    engine.register_fn("recurse", move |count: INT| -> ScriptResult<String> {
        let inner = recurse.get().map_err(into_rhai_error)?;
        inner
            .renderer
            .request_recursion(count)
            .map_err(into_rhai_error)?;
        Ok(String::new())
    });

    let file = handle.clone();
    engine.register_fn(
        "templateFile",
        move |path: &str, out: &str| -> ScriptResult<()> {
            let inner = file.get().map_err(into_rhai_error)?;
            inner
                .template_file(path, out, Value::Null)
                .map_err(into_rhai_error)
        },
    );
    let file = handle.clone();
    engine.register_fn(
        "templateFile",
        move |path: &str, out: &str, data: Dynamic| -> ScriptResult<()> {
            let inner = file.get().map_err(into_rhai_error)?;
            inner
                .template_file(path, out, script_data(data)?)
                .map_err(into_rhai_error)
        },
    );

    let string = handle.clone();
    engine.register_fn("templateString", move |path: &str| -> ScriptResult<String> {
        let inner = string.get().map_err(into_rhai_error)?;
        inner
            .template_string(path, Value::Null)
            .map_err(into_rhai_error)
    });
    let string = handle.clone();
    engine.register_fn(
        "templateString",
        move |path: &str, data: Dynamic| -> ScriptResult<String> {
            let inner = string.get().map_err(into_rhai_error)?;
            inner
                .template_string(path, script_data(data)?)
                .map_err(into_rhai_error)
        },
    );

    let input = handle.clone();
    engine.register_fn(
        "templateStringInput",
        move |name: &str, body: &str| -> ScriptResult<String> {
            let inner = input.get().map_err(into_rhai_error)?;
            inner
                .template_string_input(name, body, Value::Null)
                .map_err(into_rhai_error)
        },
    );
    let input = handle.clone();
    engine.register_fn(
        "templateStringInput",
        move |name: &str, body: &str, data: Dynamic| -> ScriptResult<String> {
            let inner = input.get().map_err(into_rhai_error)?;
            inner
                .template_string_input(name, body, script_data(data)?)
                .map_err(into_rhai_error)
        },
    );

    let register = handle.clone();
    engine.register_fn(
        "registerTemplateFunc",
        move |name: &str, function: FnPtr| -> ScriptResult<()> {
            let inner = register.get().map_err(into_rhai_error)?;
            debug!(function = name, target_fn = function.fn_name(), "script registered template function");
            inner
                .renderer
                .functions()
                .register(name, script_template_function(register.clone(), function))
                .map_err(into_rhai_error)
        },
    );

    let unregister = handle.clone();
    engine.register_fn("unregisterTemplateFunc", move |name: &str| -> ScriptResult<()> {
        let inner = unregister.get().map_err(into_rhai_error)?;
        inner
            .renderer
            .functions()
            .unregister(name)
            .map_err(into_rhai_error)
    });
}

/// Wraps a script function pointer so templates can call it.
fn script_template_function(handle: EngineHandle, function: FnPtr) -> TemplateFunction {
    Arc::new(move |args: &[Value]| -> Result<Value, SjsError> {
        let inner = handle.get()?;
        let args = args.iter().map(value_to_dynamic).collect();
        let result = inner.renderer.runtime().call_fn_ptr(&function, args)?;
        dynamic_to_value(result)
    })
}

pub(crate) fn register_template_builtins(
    table: &TemplateFunctionTable,
    handle: &EngineHandle,
) -> Result<(), SjsError> {
    let file = handle.clone();
    table.register_builtin(
        "templateFile",
        Arc::new(move |args: &[Value]| -> Result<Value, SjsError> {
            let path = string_arg("templateFile", args, 0)?;
            let out = string_arg("templateFile", args, 1)?;
            file.get()?
                .template_file(path, out, data_arg(args, 2))
                .map(|()| Value::String(String::new()))
        }),
    )?;

    let string = handle.clone();
    table.register_builtin(
        "templateString",
        Arc::new(move |args: &[Value]| -> Result<Value, SjsError> {
            let path = string_arg("templateString", args, 0)?;
            string
                .get()?
                .template_string(path, data_arg(args, 1))
                .map(Value::String)
        }),
    )?;

    let input = handle.clone();
    table.register_builtin(
        "templateStringInput",
        Arc::new(move |args: &[Value]| -> Result<Value, SjsError> {
            let name = string_arg("templateStringInput", args, 0)?;
            let body = string_arg("templateStringInput", args, 1)?;
            input
                .get()?
                .template_string_input(name, body, data_arg(args, 2))
                .map(Value::String)
        }),
    )?;
    Ok(())
}

fn string_arg<'a>(function: &str, args: &'a [Value], index: usize) -> Result<&'a str, SjsError> {
    args.get(index).and_then(Value::as_string).ok_or_else(|| {
        SjsError::new(
            ErrorKind::InvalidArgument,
            "INVALID_ARGUMENT",
            format!("{} expects a string as argument {}", function, index + 1),
        )
    })
}

fn data_arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}
