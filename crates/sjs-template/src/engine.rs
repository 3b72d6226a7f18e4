use std::error::Error as _;

use minijinja::value::{Rest, Value as TemplateValue};
use minijinja::{AutoEscape, Environment, Error, ErrorKind as TemplateErrorKind, UndefinedBehavior};
use sjs_core::{ErrorKind, SjsError, SourceLocation, Value};

use crate::functions::TemplateFunction;
use crate::recursion::{RecursionSignal, RECURSE_FUNCTION};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateSettings {
    /// Undefined values fail instead of rendering as empty text.
    pub strict_undefined: bool,
    /// Log the spliced body when a template fails to compile.
    pub debug: bool,
}

#[derive(Debug)]
pub enum TemplateFailure {
    Compile(SjsError),
    Exec {
        /// `template: <name>:<line>: <kind>: <detail>` plus the cause chain.
        message: String,
        line: Option<usize>,
        /// Byte offset of the failing expression in the rendered body.
        offset: Option<usize>,
        /// First engine error found in the cause chain, if any.
        cause: Option<SjsError>,
    },
}

/// Compiles `body` as template `name` with the given functions and renders it
/// with `data`. A fresh environment is used for every call. `pass` counts
/// from 1 within one recursive render.
pub(crate) fn render_pass(
    name: &str,
    body: &str,
    data: &Value,
    functions: Vec<(String, TemplateFunction)>,
    recursion: &RecursionSignal,
    pass: usize,
    settings: TemplateSettings,
) -> Result<String, TemplateFailure> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);
    // Only the authored body loses its final newline; later passes re-read
    // output that has already been trimmed once.
    env.set_keep_trailing_newline(pass > 1);
    if settings.strict_undefined {
        env.set_undefined_behavior(UndefinedBehavior::Strict);
    }

    for (function_name, function) in functions {
        let label = function_name.clone();
        env.add_function(
            function_name,
            move |args: Rest<TemplateValue>| -> Result<TemplateValue, Error> {
                let args = args
                    .iter()
                    .map(from_template_value)
                    .collect::<Result<Vec<_>, _>>()?;
                let value = function(&args).map_err(|error| function_error(&label, error))?;
                Ok(TemplateValue::from_serialize(&value))
            },
        );
    }
    let signal = recursion.clone();
    env.add_function(RECURSE_FUNCTION, move |count: i64| -> Result<String, Error> {
        signal
            .request(count)
            .map_err(|error| function_error(RECURSE_FUNCTION, error))?;
        Ok(String::new())
    });

    env.add_template_owned(name.to_string(), body.to_string())
        .map_err(|error| TemplateFailure::Compile(compile_error(name, &error)))?;
    let template = env
        .get_template(name)
        .map_err(|error| TemplateFailure::Compile(compile_error(name, &error)))?;
    template
        .render(TemplateValue::from_serialize(data))
        .map_err(|error| {
            let own = error.name().map_or(true, |n| n == name);
            TemplateFailure::Exec {
                message: describe(name, &error),
                line: error.line().filter(|_| own),
                offset: error.range().map(|range| range.start).filter(|_| own),
                cause: find_cause(&error),
            }
        })
}

fn from_template_value(value: &TemplateValue) -> Result<Value, Error> {
    serde_json::to_value(value)
        .map(Value::from)
        .map_err(|error| Error::new(TemplateErrorKind::BadSerialization, error.to_string()))
}

fn function_error(name: &str, error: SjsError) -> Error {
    Error::new(
        TemplateErrorKind::InvalidOperation,
        format!("call to {} failed", name),
    )
    .with_source(error)
}

fn describe(name: &str, error: &Error) -> String {
    let template = error.name().unwrap_or(name);
    let mut text = match error.line() {
        Some(line) => format!("template: {}:{}: {}", template, line, error.kind()),
        None => format!("template: {}: {}", template, error.kind()),
    };
    if let Some(detail) = error.detail() {
        text.push_str(": ");
        text.push_str(detail);
    }
    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

fn find_cause(error: &Error) -> Option<SjsError> {
    let mut source = error.source();
    while let Some(inner) = source {
        if let Some(found) = inner.downcast_ref::<SjsError>() {
            return Some(found.clone());
        }
        source = inner.source();
    }
    None
}

fn compile_error(name: &str, error: &Error) -> SjsError {
    let message = format!("failed to parse template: {}", describe(name, error));
    match error.line() {
        Some(line) => SjsError::with_location(
            ErrorKind::Compilation,
            "TEMPLATE_COMPILE",
            message,
            SourceLocation::new(name, line, 0),
        ),
        None => SjsError::new(ErrorKind::Compilation, "TEMPLATE_COMPILE", message),
    }
}
