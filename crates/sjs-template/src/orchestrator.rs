use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use sjs_core::{ErrorKind, SjsError, SourceLocation, Value};
use sjs_runtime::{Dynamic, RunOptions, ScriptRuntime};
use tracing::{debug, trace};

use crate::adapter::execute_block;
use crate::context::{Context, ContextManager, CONTEXT_BINDING};
use crate::engine::{render_pass, TemplateFailure, TemplateSettings};
use crate::extractor::{extract, Segment};
use crate::functions::TemplateFunctionTable;
use crate::recursion::{detect_directive, Continuation, RecursionSignal, RECURSE_FUNCTION};
use crate::remap::{adjust_line_numbers, SpliceMap};

/// One template invocation: a body under a name, with its local data.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub name: String,
    pub body: String,
    pub local: Value,
}

impl RenderRequest {
    pub fn new(name: impl Into<String>, body: impl Into<String>, local: Value) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            local,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub output: String,
    pub passes: usize,
}

/// Drives render passes: extract blocks, run them, splice their output,
/// execute the template, and repeat while a recursion cycle asks for it.
pub struct Renderer {
    runtime: ScriptRuntime,
    contexts: ContextManager,
    functions: TemplateFunctionTable,
    settings: TemplateSettings,
}

impl Renderer {
    pub fn new(runtime: ScriptRuntime, settings: TemplateSettings) -> Self {
        Self {
            runtime,
            contexts: ContextManager::new(),
            functions: TemplateFunctionTable::with_reserved(&[RECURSE_FUNCTION]),
            settings,
        }
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    pub fn functions(&self) -> &TemplateFunctionTable {
        &self.functions
    }

    pub fn render(&self, request: RenderRequest) -> Result<String, SjsError> {
        self.render_outcome(request).map(|outcome| outcome.output)
    }

    /// Renders one invocation under a context nested in the current one. The
    /// caller's context is current again when this returns, whether it
    /// succeeds, fails or panics.
    pub fn render_outcome(&self, request: RenderRequest) -> Result<RenderOutcome, SjsError> {
        let parent = self.contexts.require_current()?;
        let RenderRequest { name, body, local } = request;
        let directive = detect_directive(&body);
        let recursion = match directive {
            Some(_) => RecursionSignal::enabled(),
            None => RecursionSignal::disabled(),
        };

        let guard = self.contexts.enter(parent.nested(local, recursion));
        let context = Arc::clone(guard.context());
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_passes(&name, body, &context, directive)
        }));
        drop(guard);

        result.unwrap_or_else(|payload| Err(panic_error(&name, payload.as_ref())))
    }

    /// Records a `recurse(n)` request for the current invocation.
    pub fn request_recursion(&self, count: i64) -> Result<(), SjsError> {
        self.contexts.require_current()?.recursion.request(count)
    }

    /// Runs a standalone script against the current context.
    pub fn run_script(&self, name: &str, source: &str) -> Result<Dynamic, SjsError> {
        let context = self.contexts.require_current()?;
        self.runtime.run(
            name,
            source,
            RunOptions::default().bind(CONTEXT_BINDING, context.to_script()),
        )
    }

    fn run_passes(
        &self,
        name: &str,
        mut body: String,
        context: &Context,
        directive: Option<u32>,
    ) -> Result<RenderOutcome, SjsError> {
        let max_passes = directive.map_or(1, |extra| extra as usize + 1);
        let mut passes = 0;
        loop {
            self.runtime.limits().check()?;
            passes += 1;
            debug!(template = name, pass = passes, max_passes, "render pass");

            let (spliced, splices) = self.evaluate_blocks(name, &body, context)?;
            let output = self.execute_template(name, &spliced, context, &splices, passes)?;

            if directive.is_none() {
                return Ok(RenderOutcome { output, passes });
            }
            let continuation = context.recursion.consume();
            if output == spliced {
                debug!(template = name, passes, "recursion reached a fixed point");
                return Ok(RenderOutcome { output, passes });
            }
            if passes >= max_passes {
                debug!(template = name, passes, "recursion pass limit reached");
                return Ok(RenderOutcome { output, passes });
            }
            match continuation {
                Continuation::Stop => {
                    debug!(template = name, passes, "no recursion pending");
                    return Ok(RenderOutcome { output, passes });
                }
                Continuation::Continue { remaining } => {
                    trace!(template = name, ?remaining, "continuing recursion");
                }
            }
            body = output;
        }
    }

    fn evaluate_blocks(
        &self,
        name: &str,
        body: &str,
        context: &Context,
    ) -> Result<(String, SpliceMap), SjsError> {
        let mut spliced = String::with_capacity(body.len());
        let mut spliced_line = 1;
        let mut splices = SpliceMap::new();
        for segment in extract(body) {
            let text = match segment {
                Segment::Literal(text) => text.to_string(),
                Segment::Script(block) => {
                    let rendered = execute_block(&self.runtime, name, &block, context)?;
                    splices.record(spliced_line, spliced.len(), block.raw_text, &rendered);
                    trace!(
                        template = name,
                        line = block.start_line,
                        spliced_line,
                        "spliced script output"
                    );
                    rendered
                }
            };
            spliced_line += text.matches('\n').count();
            spliced.push_str(&text);
        }
        Ok((spliced, splices))
    }

    fn execute_template(
        &self,
        name: &str,
        spliced: &str,
        context: &Context,
        splices: &SpliceMap,
        pass: usize,
    ) -> Result<String, SjsError> {
        let data = context.template_data();
        let failure = match render_pass(
            name,
            spliced,
            &data,
            self.functions.snapshot(),
            &context.recursion,
            pass,
            self.settings,
        ) {
            Ok(output) => return Ok(output),
            Err(failure) => failure,
        };

        match failure {
            TemplateFailure::Compile(error) => {
                if self.settings.debug {
                    debug!(template = name, body = spliced, error = %error, "template failed to compile");
                }
                Err(error)
            }
            TemplateFailure::Exec {
                message,
                line,
                offset,
                cause,
            } => {
                let message = format!(
                    "failed to execute template: {}",
                    adjust_line_numbers(name, &message, splices, offset)
                );
                let kind = match &cause {
                    Some(cause) if cause.is_cancelled() => ErrorKind::Cancelled,
                    _ => ErrorKind::Runtime,
                };
                let code = if kind == ErrorKind::Cancelled {
                    "SCRIPT_CANCELLED"
                } else {
                    "TEMPLATE_EXEC"
                };
                let location = line.map(|line| {
                    SourceLocation::new(name, splices.original_position(line, offset), 0)
                });
                Err(match location {
                    Some(location) => SjsError::with_location(kind, code, message, location),
                    None => SjsError::new(kind, code, message),
                })
            }
        }
    }
}

fn panic_error(name: &str, payload: &(dyn Any + Send)) -> SjsError {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|text| text.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    SjsError::runtime(
        "TEMPLATE_PANIC",
        format!("failed to render template {}: {}", name, detail),
    )
}

#[cfg(test)]
mod orchestrator_tests {
    use std::sync::Weak;

    use super::*;
    use crate::functions::TemplateFunction;
    use sjs_runtime::{CancellationToken, RuntimeBuilder, RuntimeOptions};

    fn renderer_with(options: RuntimeOptions) -> Renderer {
        let renderer = Renderer::new(
            RuntimeBuilder::new(options).build(),
            TemplateSettings::default(),
        );
        renderer
            .contexts()
            .install(Context::root(Value::map([("Name", Value::from("Bob"))])));
        renderer
    }

    fn renderer() -> Renderer {
        renderer_with(RuntimeOptions::default())
    }

    fn render(renderer: &Renderer, body: &str) -> Result<RenderOutcome, SjsError> {
        renderer.render_outcome(RenderRequest::new("page.tmpl", body, Value::Null))
    }

    #[test]
    fn script_output_is_spliced_in_place() {
        let outcome = render(
            &renderer(),
            "{{ Global.Name }}\n```sjs\nrender(\"X\")\nsjs```\n",
        )
        .expect("render should pass");
        assert_eq!(outcome.output, "Bob\nX");
        assert_eq!(outcome.passes, 1);
    }

    #[test]
    fn bodies_without_blocks_render_as_plain_templates() {
        let renderer = renderer();
        let output = renderer
            .render(RenderRequest::new(
                "plain.tmpl",
                "Hi {{ Local.Who }} & {{ Global.Name }}\n<b>{{ '{{' }}\n",
                Value::map([("Who", Value::from("Ann"))]),
            ))
            .expect("render should pass");
        assert_eq!(output, "Hi Ann & Bob\n<b>{{");
    }

    #[test]
    fn silent_blocks_vanish() {
        let output = render(&renderer(), "a\n```sjs\nlet unused = 1;\nsjs```\nb")
            .expect("render should pass")
            .output;
        assert_eq!(output, "a\n\nb");
    }

    #[test]
    fn local_computed_is_live_within_and_fresh_across_invocations() {
        let renderer = renderer();
        let first = render(
            &renderer,
            "```sjs\ncontext.LocalComputed.Count = 5;\ncontext.GlobalComputed.Seen = true;\nsjs```{{ LocalComputed.Count }}",
        )
        .expect("first render should pass");
        assert_eq!(first.output, "5");

        let second = render(&renderer, "[{{ LocalComputed.Count }}] {{ GlobalComputed.Seen }}")
            .expect("second render should pass");
        assert_eq!(second.output, "[] true");
    }

    #[test]
    fn recursion_sees_the_recursive_store_after_two_passes() {
        let outcome = render(
            &renderer(),
            "{{ recurse(1) }}\n```sjs\ncontext.RecursiveComputed.Count = 5;\nsjs```\n{{ RecursiveComputed.Count }}",
        )
        .expect("render should pass");
        assert!(outcome.output.contains('5'));
        assert_eq!(outcome.output, "\n\n5");
        assert_eq!(outcome.passes, 2);
    }

    #[test]
    fn each_pass_renders_the_previous_output() {
        let outcome = render(
            &renderer(),
            "{{ recurse(2) }}{{ \"{{ '{{ 1 + 1 }}' }}\" }}",
        )
        .expect("render should pass");
        assert_eq!(outcome.output, "2");
        assert_eq!(outcome.passes, 3);
    }

    #[test]
    fn declared_count_is_a_hard_ceiling() {
        let outcome = render(&renderer(), "{{ recurse(1) }}{{ '{{ recurse(1) }}' }}x")
            .expect("render should pass");
        assert_eq!(outcome.output, "x");
        assert_eq!(outcome.passes, 2);
    }

    #[test]
    fn trailing_newlines_are_trimmed_once_across_passes() {
        let outcome = render(&renderer(), "{{ recurse(1) }}a\n\n").expect("render should pass");
        assert_eq!(outcome.output, "a\n");
        assert_eq!(outcome.passes, 2);
    }

    #[test]
    fn recursion_requires_a_first_line_directive() {
        let outcome = render(&renderer(), "a{{ recurse(1) }}b").expect("render should pass");
        assert_eq!(outcome.output, "ab");
        assert_eq!(outcome.passes, 1);
    }

    #[test]
    fn duplicate_recurse_calls_fail() {
        let error = render(&renderer(), "{{ recurse(1) }}{{ recurse(1) }}")
            .expect_err("second recurse should fail");
        assert_eq!(error.code, "TEMPLATE_EXEC");
        assert!(error
            .message
            .contains("recurse should only be declared once per template"));
    }

    #[test]
    fn exec_errors_report_original_lines() {
        let error = render(
            &renderer(),
            "line1\n```sjs\nrender(\"a\")\nsjs```\n{{ Missing.Deep }}",
        )
        .expect_err("undefined attribute should fail");
        assert_eq!(error.code, "TEMPLATE_EXEC");
        assert!(
            error.message.contains("template: page.tmpl:5:"),
            "{}",
            error.message
        );
        assert_eq!(error.location.expect("location").line, 5);
    }

    #[test]
    fn text_after_a_closing_fence_reports_its_own_line() {
        let error = render(&renderer(), "a ```sjs\nlet q = 1;\nsjs``` {{ Missing.Deep }}")
            .expect_err("undefined attribute should fail");
        assert!(
            error.message.contains("template: page.tmpl:3:"),
            "{}",
            error.message
        );
        assert_eq!(error.location.expect("location").line, 3);

        let error = render(&renderer(), "{{ Missing.Deep }} ```sjs\nlet q = 1;\nsjs```")
            .expect_err("undefined attribute should fail");
        assert_eq!(error.location.expect("location").line, 1);
    }

    #[test]
    fn self_referencing_stores_do_not_abort_the_render() {
        let output = render(
            &renderer(),
            "```sjs\ncontext.LocalComputed.me = context.LocalComputed;\nrender(\"ok\");\nsjs```{{ LocalComputed.me is none }}",
        )
        .expect("render should pass")
        .output;
        assert_eq!(output, "oktrue");
    }

    #[test]
    fn malformed_fences_render_as_text() {
        let output = render(&renderer(), "A {{ Global.Name }}\n```sjs\nrender(\"x\")\n")
            .expect("render should pass")
            .output;
        assert_eq!(output, "A Bob\n```sjs\nrender(\"x\")");
    }

    #[test]
    fn failures_and_panics_restore_the_caller_context() {
        let renderer = renderer();
        let boom: TemplateFunction =
            Arc::new(|_args: &[Value]| -> Result<Value, SjsError> { panic!("function exploded") });
        renderer
            .functions()
            .register("boom", boom)
            .expect("register should pass");

        let error = render(&renderer, "{{ boom() }}").expect_err("panic should be caught");
        assert_eq!(error.code, "TEMPLATE_PANIC");
        assert!(error.message.contains("function exploded"));

        render(&renderer, "```sjs\nthrow \"x\";\nsjs```").expect_err("throw should fail");
        let current = renderer.contexts().require_current().expect("root is current");
        assert!(current.local.is_null());
        assert!(current.recursive_computed.is_none());
    }

    #[test]
    fn rendering_requires_a_root_context() {
        let renderer = Renderer::new(
            RuntimeBuilder::new(RuntimeOptions::default()).build(),
            TemplateSettings::default(),
        );
        let error = render(&renderer, "x").expect_err("uninitialized render should fail");
        assert_eq!(error.code, "ENGINE_NOT_INITIALIZED");
    }

    #[test]
    fn nested_invocations_get_their_own_local_tiers() {
        let renderer = Arc::new(renderer());
        let weak: Weak<Renderer> = Arc::downgrade(&renderer);
        let partial: TemplateFunction = Arc::new(move |args: &[Value]| -> Result<Value, SjsError> {
            let renderer = weak.upgrade().expect("renderer should be alive");
            renderer
                .render(RenderRequest::new(
                    "partial.tmpl",
                    "{{ Local }}:[{{ LocalComputed.Count }}]:{{ RecursiveComputed.Step }}",
                    args.first().cloned().unwrap_or_default(),
                ))
                .map(Value::from)
        });
        renderer
            .functions()
            .register("partial", partial)
            .expect("register should pass");

        let outcome = render(
            &renderer,
            "{{ recurse(1) }}\n```sjs\ncontext.LocalComputed.Count = 1;\ncontext.RecursiveComputed.Step = \"s\";\nsjs```{{ partial(\"inner\") }}",
        )
        .expect("render should pass");
        assert_eq!(outcome.output, "\ninner:[]:s");
    }

    #[test]
    fn cancellation_stops_the_render() {
        let token = CancellationToken::new();
        let renderer = renderer_with(RuntimeOptions {
            cancellation: Some(token.clone()),
            ..RuntimeOptions::default()
        });
        token.cancel();
        let error = render(&renderer, "x").expect_err("cancelled render should fail");
        assert!(error.is_cancelled());
    }
}
