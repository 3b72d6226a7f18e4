use std::sync::{Mutex, MutexGuard, PoisonError};

use rhai::{Dynamic, EvalAltResult, ParseError, Position};
use sjs_core::{ErrorKind, SjsError, SourceLocation, StackFrame};

use crate::source_map::SourceMapCache;

/// Locks `mutex`, recovering the guard if a panicking holder poisoned it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hands an engine error to the script runtime so it unwinds the script.
///
/// Cancellation stays a termination so enclosing scripts halt as well; every
/// other error travels as the thrown value and is recovered intact by
/// [`map_eval_error`].
pub fn into_rhai_error(error: SjsError) -> Box<EvalAltResult> {
    if error.is_cancelled() {
        return EvalAltResult::ErrorTerminated(Dynamic::from(error), Position::NONE).into();
    }
    EvalAltResult::ErrorRuntime(Dynamic::from(error), Position::NONE).into()
}

pub(crate) fn map_parse_error(error: ParseError, name: &str, start_line: usize) -> SjsError {
    let ParseError(kind, position) = error;
    let location = snippet_location(name, position, start_line);
    SjsError::with_location(
        ErrorKind::Compilation,
        "SCRIPT_COMPILE",
        format!("script compilation failed: {} @ {}", kind, location),
        location,
    )
}

pub(crate) fn map_eval_error(
    error: EvalAltResult,
    script_key: &str,
    source_maps: &SourceMapCache,
) -> SjsError {
    // (function, source of the function, call position in the caller)
    let mut calls: Vec<(String, String, Position)> = Vec::new();
    let mut current = error;
    let innermost = loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(function, source, inner, position) => {
                calls.push((function, source, position));
                current = *inner;
            }
            EvalAltResult::ErrorInModule(module, inner, position) => {
                calls.push((module.clone(), module, position));
                current = *inner;
            }
            other => break other,
        }
    };

    let source_of = |source: &str| {
        if source.is_empty() {
            script_key.to_string()
        } else {
            source.to_string()
        }
    };
    let frame_at = |function: &str, source: &str, position: Position| {
        let (display, line) = match position.line() {
            Some(line) => source_maps.resolve(source, line),
            None => (source_maps.display_name(source), 0),
        };
        StackFrame {
            function: function.to_string(),
            location: SourceLocation::new(display, line, position.position().unwrap_or(0)),
        }
    };

    let mut innermost = innermost;
    let inner_position = innermost.take_position();

    let mut frames = Vec::with_capacity(calls.len() + 1);
    let (inner_function, inner_source) = calls
        .last()
        .map(|(function, source, _)| (function.clone(), source_of(source)))
        .unwrap_or_else(|| (String::new(), script_key.to_string()));
    frames.push(frame_at(&inner_function, &inner_source, inner_position));
    for index in (0..calls.len()).rev() {
        let (caller_function, caller_source) = if index == 0 {
            (String::new(), script_key.to_string())
        } else {
            let (function, source, _) = &calls[index - 1];
            (function.clone(), source_of(source))
        };
        frames.push(frame_at(&caller_function, &caller_source, calls[index].2));
    }

    let stack = frames
        .iter()
        .map(|frame| format!("\n    {}", frame))
        .collect::<String>();
    let location = frames.first().map(|frame| frame.location.clone());

    let mut mapped = match innermost {
        EvalAltResult::ErrorTerminated(value, _) => match value.try_cast::<SjsError>() {
            Some(error) => error,
            None => SjsError::new(
                ErrorKind::Cancelled,
                "SCRIPT_CANCELLED",
                "script execution was halted",
            ),
        },
        EvalAltResult::ErrorRuntime(value, _) if value.is::<SjsError>() => value
            .try_cast::<SjsError>()
            .unwrap_or_else(|| SjsError::runtime("SCRIPT_RUNTIME", "script runtime failure")),
        EvalAltResult::ErrorParsing(kind, _) => SjsError::new(
            ErrorKind::Compilation,
            "SCRIPT_COMPILE",
            format!("script compilation failed: {}", kind),
        ),
        other => SjsError::runtime(
            "SCRIPT_RUNTIME",
            format!("script runtime failure: {}", other),
        ),
    };
    mapped.message = format!("{}{}", mapped.message, stack);
    if mapped.location.is_none() {
        mapped.location = location;
    }
    mapped
}

fn snippet_location(name: &str, position: Position, start_line: usize) -> SourceLocation {
    let line = position
        .line()
        .map(|line| line + start_line.max(1) - 1)
        .unwrap_or(0);
    SourceLocation::new(name, line, position.position().unwrap_or(0))
}
