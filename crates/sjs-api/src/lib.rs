use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use sjs_core::{ErrorKind, SjsError, Value};
use sjs_runtime::{
    dynamic_to_value, value_to_dynamic, CancellationToken, Dynamic, HostFunctionRegistry,
    RuntimeBuilder, RuntimeOptions,
};
use sjs_template::{Context, RenderRequest, Renderer, TemplateFunction, TemplateSettings};
use tracing::{debug, info};

mod files;
mod host_api;

pub use files::{DiskReader, DiskWriter, ReadFile, WriteFile};
pub use host_api::{SCRIPT_HOST_API, TEMPLATE_BUILTINS};
pub use sjs_template::RECURSE_FUNCTION;

use files::FileResolver;
use host_api::{register_script_api, register_template_builtins};

#[derive(Clone, Default)]
pub struct EngineOptions {
    /// Directories tried in order when resolving template and script paths.
    pub search_locations: Vec<String>,
    pub read_file: Option<Arc<dyn ReadFile>>,
    pub write_file: Option<Arc<dyn WriteFile>>,
    pub template_functions: Vec<(String, TemplateFunction)>,
    pub host_functions: Option<Arc<dyn HostFunctionRegistry>>,
    /// Scripts run by `init`, in name order, before any template.
    pub script_files: BTreeMap<String, String>,
    pub random_seed: Option<u32>,
    pub debug: bool,
    pub strict_undefined: bool,
    pub cancellation: Option<CancellationToken>,
    pub script_timeout: Option<Duration>,
}

/// Late-bound reference from registered callbacks back to the engine.
///
/// Callbacks are registered while the engine is still being assembled, so the
/// handle starts empty and is bound once the engine exists.
#[derive(Clone, Default)]
pub(crate) struct EngineHandle(Arc<OnceLock<Weak<EngineInner>>>);

impl EngineHandle {
    fn bind(&self, inner: &Arc<EngineInner>) {
        let _ = self.0.set(Arc::downgrade(inner));
    }

    pub(crate) fn get(&self) -> Result<Arc<EngineInner>, SjsError> {
        self.0.get().and_then(Weak::upgrade).ok_or_else(|| {
            SjsError::new(
                ErrorKind::Lifecycle,
                "ENGINE_DROPPED",
                "engine is no longer available",
            )
        })
    }
}

pub(crate) struct EngineInner {
    pub(crate) renderer: Renderer,
    files: FileResolver,
    script_files: BTreeMap<String, String>,
}

impl EngineInner {
    fn ensure_initialized(&self) -> Result<(), SjsError> {
        self.renderer.contexts().require_current().map(|_| ())
    }

    pub(crate) fn require(&self, path: &str, caller: Option<&str>) -> Result<Dynamic, SjsError> {
        let resolved = self.files.resolve_from(path, caller);
        debug!(script = %resolved, "require");
        let source = self.files.read_text(&resolved)?;
        self.renderer.run_script(&resolved, &source)
    }

    fn run_script(&self, path: &str) -> Result<Value, SjsError> {
        let resolved = self.files.resolve(path);
        let source = self.files.read_text(&resolved)?;
        let value = self.renderer.run_script(&resolved, &source)?;
        dynamic_to_value(value)
    }

    pub(crate) fn template_file(&self, path: &str, out: &str, local: Value) -> Result<(), SjsError> {
        let output = self.template_string(path, local)?;
        info!(template = path, out, "writing rendered template");
        self.files.write_text(out, &output)
    }

    pub(crate) fn template_string(&self, path: &str, local: Value) -> Result<String, SjsError> {
        self.ensure_initialized()?;
        let resolved = self.files.resolve(path);
        let body = self.files.read_text(&resolved)?;
        self.renderer.render(RenderRequest::new(resolved, body, local))
    }

    pub(crate) fn template_string_input(
        &self,
        name: &str,
        body: &str,
        local: Value,
    ) -> Result<String, SjsError> {
        self.renderer.render(RenderRequest::new(name, body, local))
    }
}

/// The template engine: scripts, templates and the context they share.
///
/// Create it with [`Engine::new`], call [`Engine::init`] once with the global
/// data, then render. An engine must not be used from several threads at the
/// same time; the current context is engine-wide state.
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Result<Self, SjsError> {
        let handle = EngineHandle::default();

        let mut builder = RuntimeBuilder::new(RuntimeOptions {
            random_seed: options.random_seed,
            cancellation: options.cancellation,
            script_timeout: options.script_timeout,
        });
        register_script_api(&mut builder, &handle);
        if let Some(host_functions) = options.host_functions {
            builder.register_host_functions(host_functions)?;
        }

        let renderer = Renderer::new(
            builder.build(),
            TemplateSettings {
                strict_undefined: options.strict_undefined,
                debug: options.debug,
            },
        );
        register_template_builtins(renderer.functions(), &handle)?;
        for (name, function) in options.template_functions {
            renderer.functions().register(&name, function)?;
        }

        let inner = Arc::new(EngineInner {
            renderer,
            files: FileResolver::new(
                options.search_locations,
                options.read_file,
                options.write_file,
            ),
            script_files: options.script_files,
        });
        handle.bind(&inner);
        Ok(Self { inner })
    }

    /// Installs the outermost context with `global` as its Global data and
    /// runs the configured script files. Succeeds once; if a script fails the
    /// engine is left uninitialized and `init` can be called again.
    pub fn init(&self, global: Value) -> Result<(), SjsError> {
        if self.inner.renderer.contexts().current().is_some() {
            return Err(SjsError::new(
                ErrorKind::Lifecycle,
                "ENGINE_ALREADY_INITIALIZED",
                "engine has already been initialized",
            ));
        }
        self.inner.renderer.contexts().install(Context::root(global));

        let _deadline = self.inner.renderer.runtime().limits().arm();
        for (name, source) in &self.inner.script_files {
            debug!(script = %name, "running init script");
            if let Err(error) = self.inner.renderer.run_script(name, source) {
                self.inner.renderer.contexts().clear();
                return Err(error.context(format!("init script {} failed", name)));
            }
        }
        Ok(())
    }

    /// Reads and runs a script file; returns its last value.
    pub fn run_script(&self, path: &str) -> Result<Value, SjsError> {
        self.inner.ensure_initialized()?;
        let _deadline = self.inner.renderer.runtime().limits().arm();
        self.inner.run_script(path)
    }

    pub fn run_function(&self, name: &str, args: &[Value]) -> Result<Value, SjsError> {
        self.inner.ensure_initialized()?;
        let _deadline = self.inner.renderer.runtime().limits().arm();
        let args = args.iter().map(value_to_dynamic).collect();
        let value = self.inner.renderer.runtime().run_function(name, args)?;
        dynamic_to_value(value)
    }

    /// Renders the template at `path` and writes the result to `out`. Nothing
    /// is written when rendering fails.
    pub fn template_file(&self, path: &str, out: &str, local: Value) -> Result<(), SjsError> {
        self.inner.ensure_initialized()?;
        let _deadline = self.inner.renderer.runtime().limits().arm();
        self.inner.template_file(path, out, local)
    }

    pub fn template_string(&self, path: &str, local: Value) -> Result<String, SjsError> {
        self.inner.ensure_initialized()?;
        let _deadline = self.inner.renderer.runtime().limits().arm();
        self.inner.template_string(path, local)
    }

    /// Renders `body` as a template called `name`.
    pub fn template_string_input(
        &self,
        name: &str,
        body: &str,
        local: Value,
    ) -> Result<String, SjsError> {
        self.inner.ensure_initialized()?;
        let _deadline = self.inner.renderer.runtime().limits().arm();
        self.inner.template_string_input(name, body, local)
    }

    pub fn register_template_function(
        &self,
        name: &str,
        function: TemplateFunction,
    ) -> Result<(), SjsError> {
        self.inner.ensure_initialized()?;
        self.inner.renderer.functions().register(name, function)
    }

    pub fn unregister_template_function(&self, name: &str) -> Result<(), SjsError> {
        self.inner.ensure_initialized()?;
        self.inner.renderer.functions().unregister(name)
    }

    pub fn template_function_names(&self) -> Vec<String> {
        self.inner.renderer.functions().names()
    }

    /// Snapshot of the GlobalComputed store.
    pub fn global_computed(&self) -> Result<Value, SjsError> {
        self.inner
            .renderer
            .contexts()
            .require_current()
            .map(|context| context.global_computed.export_lossy())
    }
}
