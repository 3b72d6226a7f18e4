use sjs_core::SjsError;
use sjs_runtime::{RunOptions, ScriptRuntime};
use tracing::trace;

use crate::context::{Context, CONTEXT_BINDING};
use crate::extractor::ScriptBlock;

/// Runs one script block and returns what it rendered, newline-joined.
///
/// The block's `render` calls go to a frame that exists only for this run.
/// A failing block contributes nothing; its partial output is discarded.
pub fn execute_block(
    runtime: &ScriptRuntime,
    template: &str,
    block: &ScriptBlock<'_>,
    context: &Context,
) -> Result<String, SjsError> {
    trace!(template, line = block.start_line, "executing script block");
    let frame = runtime.capture_emit();
    runtime
        .run(
            template,
            block.script_source,
            RunOptions::at_line(block.start_line).bind(CONTEXT_BINDING, context.to_script()),
        )
        .map_err(|error| {
            error.context(format!(
                "failed to run inline script in {}:\n```sjs\n{}sjs```\n",
                template, block.script_source
            ))
        })?;
    Ok(frame.finish())
}
