mod adapter;
mod context;
mod engine;
mod extractor;
mod functions;
mod orchestrator;
mod recursion;
mod remap;

pub use adapter::execute_block;
pub use context::{Context, ContextGuard, ContextManager, CONTEXT_BINDING};
pub use engine::{TemplateFailure, TemplateSettings};
pub use extractor::{extract, ScriptBlock, Segment, Segments};
pub use functions::{TemplateFunction, TemplateFunctionTable};
pub use orchestrator::{RenderOutcome, RenderRequest, Renderer};
pub use recursion::{detect_directive, RecursionSignal, RECURSE_FUNCTION};
pub use remap::{adjust_line_numbers, SpliceMap};
