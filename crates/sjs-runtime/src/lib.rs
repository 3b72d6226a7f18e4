mod bridge;
mod emit;
mod error_map;
mod host;
mod limits;
mod rng;
mod runtime;
mod source_map;
mod store;

pub use bridge::{dynamic_to_value, value_to_dynamic};
pub use emit::{EmitGuard, EmitStack};
pub use error_map::{into_rhai_error, lock};
pub use host::{EmptyHostFunctionRegistry, HostFunctionRegistry};
pub use limits::{DeadlineGuard, ExecutionLimits};
pub use runtime::{RunOptions, RuntimeBuilder, RuntimeOptions, ScriptRuntime, BUILTIN_SCRIPT_FUNCTIONS};
pub use source_map::SourceMapCache;
pub use store::ComputedStore;

pub use rhai::{Dynamic, FnPtr, Map, NativeCallContext, AST};
pub use tokio_util::sync::CancellationToken;
