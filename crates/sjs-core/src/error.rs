use crate::types::SourceLocation;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Script or template source failed to compile.
    Compilation,
    /// Script threw, or template execution failed.
    Runtime,
    /// A function name collided with an existing registration, or was missing on unregister.
    ReservedName,
    /// Execution was halted by a cancellation token or deadline.
    Cancelled,
    Io,
    InvalidArgument,
    Lifecycle,
}

#[derive(Debug, Error, Clone)]
#[error("{code}: {message}")]
pub struct SjsError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl SjsError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            location: Some(location),
        }
    }

    pub fn runtime(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, code, message)
    }

    pub fn reserved(name: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ReservedName,
            "TEMPLATE_FUNC_RESERVED",
            format!("{} is reserved: {}", name, detail.into()),
        )
    }

    pub fn io(code: impl Into<String>, path: &str, error: &std::io::Error) -> Self {
        Self::new(ErrorKind::Io, code, format!("{}: {}", path, error))
    }

    pub fn not_initialized() -> Self {
        Self::new(
            ErrorKind::Lifecycle,
            "ENGINE_NOT_INITIALIZED",
            "engine has not been initialized",
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Prefixes the message with `context`, keeping kind, code and location.
    pub fn context(mut self, context: impl AsRef<str>) -> Self {
        self.message = format!("{}: {}", context.as_ref(), self.message);
        self
    }
}
