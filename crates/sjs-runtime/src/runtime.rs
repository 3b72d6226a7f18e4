use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Scope, AST, FLOAT, INT};
use sjs_core::{ErrorKind, SjsError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::bridge::dynamic_to_value;
use crate::emit::{EmitGuard, EmitStack};
use crate::error_map::{into_rhai_error, lock, map_eval_error, map_parse_error};
use crate::host::{register_host_functions, HostFunctionRegistry};
use crate::limits::{cancelled, ExecutionLimits};
use crate::rng::{next_random_bounded, next_random_unit, seed_from_clock};
use crate::source_map::SourceMapCache;
use crate::store::register_store_api;

/// Script functions the runtime itself provides.
pub const BUILTIN_SCRIPT_FUNCTIONS: &[&str] = &["render", "random", "print", "debug"];

#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub random_seed: Option<u32>,
    pub cancellation: Option<CancellationToken>,
    pub script_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Line of the enclosing file the source's first line sits on.
    pub start_line: usize,
    /// Variables pushed into the run's scope.
    pub bindings: Vec<(String, Dynamic)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_line: 1,
            bindings: Vec::new(),
        }
    }
}

impl RunOptions {
    pub fn at_line(start_line: usize) -> Self {
        Self {
            start_line,
            ..Self::default()
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: Dynamic) -> Self {
        self.bindings.push((name.into(), value));
        self
    }
}

pub struct RuntimeBuilder {
    engine: Engine,
    emit: EmitStack,
    limits: Arc<ExecutionLimits>,
    reserved: BTreeSet<String>,
}

impl RuntimeBuilder {
    pub fn new(options: RuntimeOptions) -> Self {
        let mut engine = Engine::new();
        register_store_api(&mut engine);

        let emit = EmitStack::new();
        let sink = emit.clone();
        engine.register_fn(
            "render",
            move |value: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let text = dynamic_to_value(value).map_err(into_rhai_error)?.to_text();
                sink.emit(text).map_err(into_rhai_error)
            },
        );

        let seed = options.random_seed.unwrap_or_else(seed_from_clock);
        let rng_state = Arc::new(Mutex::new(seed));
        let unit_state = Arc::clone(&rng_state);
        engine.register_fn("random", move || -> FLOAT {
            next_random_unit(&mut lock(&unit_state))
        });
        let bounded_state = Arc::clone(&rng_state);
        engine.register_fn(
            "random",
            move |bound: INT| -> Result<INT, Box<EvalAltResult>> {
                if bound <= 0 {
                    return Err(into_rhai_error(SjsError::new(
                        ErrorKind::InvalidArgument,
                        "INVALID_ARGUMENT",
                        "random(n) expects positive integer n.",
                    )));
                }
                let bound = bound.min(INT::from(u32::MAX)) as u32;
                Ok(next_random_bounded(&mut lock(&bounded_state), bound) as INT)
            },
        );

        engine.on_print(|text| info!(target: "sjs::script", "{}", text));
        engine.on_debug(|text, source, position| {
            debug!(
                target: "sjs::script",
                source = source.unwrap_or_default(),
                line = position.line().unwrap_or(0),
                "{}",
                text
            )
        });

        let limits = Arc::new(ExecutionLimits::new(
            options.cancellation,
            options.script_timeout,
        ));
        let watched = Arc::clone(&limits);
        engine.on_progress(move |_| {
            watched
                .halt_reason()
                .map(|reason| Dynamic::from(cancelled(reason)))
        });

        Self {
            engine,
            emit,
            limits,
            reserved: BUILTIN_SCRIPT_FUNCTIONS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }

    /// Access for registering additional native functions before `build`.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn emit_stack(&self) -> &EmitStack {
        &self.emit
    }

    /// Marks `name` as taken so host registries cannot shadow it.
    pub fn reserve(&mut self, name: impl Into<String>) -> &mut Self {
        self.reserved.insert(name.into());
        self
    }

    pub fn register_host_functions(
        &mut self,
        registry: Arc<dyn HostFunctionRegistry>,
    ) -> Result<&mut Self, SjsError> {
        let mut seen = BTreeSet::new();
        for name in registry.names() {
            if self.reserved.contains(name) {
                return Err(SjsError::reserved(name, "builtin script function"));
            }
            if !seen.insert(name.as_str()) {
                return Err(SjsError::reserved(name, "host function listed twice"));
            }
        }
        register_host_functions(&mut self.engine, &registry);
        for name in registry.names() {
            self.reserved.insert(name.clone());
        }
        Ok(self)
    }

    pub fn build(self) -> ScriptRuntime {
        ScriptRuntime {
            engine: self.engine,
            library: Mutex::new(Arc::new(AST::empty())),
            emit: self.emit,
            limits: self.limits,
            source_maps: SourceMapCache::new(),
        }
    }
}

/// The script collaborator: compiles and runs sources by name, keeps the
/// functions they define, and maps failures back to original source lines.
pub struct ScriptRuntime {
    engine: Engine,
    library: Mutex<Arc<AST>>,
    emit: EmitStack,
    limits: Arc<ExecutionLimits>,
    source_maps: SourceMapCache,
}

impl ScriptRuntime {
    pub fn compile(&self, name: &str, source: &str, start_line: usize) -> Result<AST, SjsError> {
        let mut ast = self
            .engine
            .compile(source)
            .map_err(|error| map_parse_error(error, name, start_line))?;
        let key = SourceMapCache::key_for(name, start_line);
        self.source_maps.record(&key, name, start_line);
        ast.set_source(key);
        Ok(ast)
    }

    /// Compiles and runs `source` in a fresh scope.
    ///
    /// Functions the source defines join the shared library before the
    /// statements run, so they are callable from later runs, from
    /// [`ScriptRuntime::run_function`] and from function pointers handed out
    /// during this run.
    pub fn run(&self, name: &str, source: &str, options: RunOptions) -> Result<Dynamic, SjsError> {
        self.limits.check()?;
        let ast = self.compile(name, source, options.start_line)?;
        let key = SourceMapCache::key_for(name, options.start_line);
        self.retain_functions(&ast);

        let mut program = self.library().merge(&ast);
        program.set_source(key.clone());
        let mut scope = Scope::new();
        for (binding, value) in options.bindings {
            scope.push_dynamic(binding, value);
        }

        trace!(script = %key, "running script");
        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &program)
            .map_err(|error| map_eval_error(*error, &key, &self.source_maps))
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.library()
            .iter_functions()
            .any(|function| function.name == name)
    }

    pub fn run_function(&self, name: &str, args: Vec<Dynamic>) -> Result<Dynamic, SjsError> {
        if !self.has_function(name) {
            return Err(SjsError::runtime(
                "SCRIPT_FUNCTION_NOT_FOUND",
                format!("script function \"{}\" is not defined", name),
            ));
        }
        self.limits.check()?;
        let library = self.library();
        let key = library.source().unwrap_or(name).to_string();
        let mut scope = Scope::new();
        self.engine
            .call_fn::<Dynamic>(&mut scope, &library, name, args)
            .map_err(|error| map_eval_error(*error, &key, &self.source_maps))
    }

    pub fn call_fn_ptr(&self, function: &FnPtr, args: Vec<Dynamic>) -> Result<Dynamic, SjsError> {
        self.limits.check()?;
        let library = self.library();
        function
            .call::<Dynamic>(&self.engine, &library, args)
            .map_err(|error| map_eval_error(*error, function.fn_name(), &self.source_maps))
    }

    /// Opens an output frame for one script block's `render` calls.
    pub fn capture_emit(&self) -> EmitGuard {
        self.emit.capture()
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub fn source_maps(&self) -> &SourceMapCache {
        &self.source_maps
    }

    fn library(&self) -> Arc<AST> {
        Arc::clone(&lock(&self.library))
    }

    fn retain_functions(&self, ast: &AST) {
        let functions = ast.clone_functions_only();
        if functions.iter_functions().next().is_none() {
            return;
        }
        let mut library = lock(&self.library);
        *library = Arc::new(library.merge(&functions));
    }
}
