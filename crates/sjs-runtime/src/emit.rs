use std::sync::{Arc, Mutex};

use sjs_core::SjsError;

use crate::error_map::lock;

/// Output frames for the `render` script function.
///
/// A frame is pushed for each script block and popped when the block
/// finishes, so a nested block (a template rendered from inside a script)
/// writes to its own frame and never to its caller's.
#[derive(Debug, Clone, Default)]
pub struct EmitStack {
    frames: Arc<Mutex<Vec<Vec<String>>>>,
}

impl EmitStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        lock(&self.frames).len()
    }

    pub fn emit(&self, text: impl Into<String>) -> Result<(), SjsError> {
        match lock(&self.frames).last_mut() {
            Some(frame) => {
                frame.push(text.into());
                Ok(())
            }
            None => Err(SjsError::runtime(
                "SCRIPT_EMIT_UNAVAILABLE",
                "render() is only available inside a template script block",
            )),
        }
    }

    /// Opens a frame; the returned guard closes it even when the block fails.
    pub fn capture(&self) -> EmitGuard {
        let mut frames = lock(&self.frames);
        frames.push(Vec::new());
        EmitGuard {
            stack: self.clone(),
            depth: frames.len(),
            finished: false,
        }
    }

    fn pop_to(&self, depth: usize) -> Vec<String> {
        let mut frames = lock(&self.frames);
        let mut out = Vec::new();
        while frames.len() >= depth {
            match frames.pop() {
                Some(frame) if frames.len() + 1 == depth => out = frame,
                Some(_) => {}
                None => break,
            }
        }
        out
    }
}

#[derive(Debug)]
pub struct EmitGuard {
    stack: EmitStack,
    depth: usize,
    finished: bool,
}

impl EmitGuard {
    /// Closes the frame and returns the emitted strings joined by newlines.
    pub fn finish(mut self) -> String {
        self.finished = true;
        self.stack.pop_to(self.depth).join("\n")
    }
}

impl Drop for EmitGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.stack.pop_to(self.depth);
        }
    }
}
