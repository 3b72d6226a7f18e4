use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;
use sjs_core::{ErrorKind, SjsError};
use sjs_runtime::lock;

/// Template and script function that requests further passes.
pub const RECURSE_FUNCTION: &str = "recurse";

fn directive_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^\{\{-?\s*recurse\s*\(\s*(\d+)\s*\)\s*-?\}\}$").expect("recurse directive regex")
    })
}

/// Returns the requested number of extra passes when the first line of
/// `body` is a recursion directive. A directive on any later line is ignored.
pub fn detect_directive(body: &str) -> Option<u32> {
    let normalized = body.replace("\r\n", "\n");
    let first_line = normalized.split('\n').next().unwrap_or_default();
    directive_regex()
        .captures(first_line)
        .and_then(|captures| captures.get(1))
        .and_then(|count| count.as_str().parse::<u32>().ok())
        .filter(|count| *count > 0)
}

/// Out-of-band continuation signal for one recursion cycle.
///
/// `recurse(n)` leaves `n - 1` pending; after each pass the orchestrator
/// consumes the pending count. Clones share the same state.
#[derive(Debug, Clone)]
pub struct RecursionSignal {
    enabled: bool,
    pending: Arc<Mutex<Option<u32>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Continuation {
    /// Run another pass with `remaining` still pending afterwards.
    Continue { remaining: Option<u32> },
    Stop,
}

impl RecursionSignal {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// A signal for bodies without a directive; requests are validated and
    /// then dropped.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn request(&self, count: i64) -> Result<(), SjsError> {
        if count < 1 {
            return Err(SjsError::new(
                ErrorKind::InvalidArgument,
                "TEMPLATE_RECURSE_INVALID",
                format!("recurse({}) invalid: must recurse at least once", count),
            ));
        }
        if !self.enabled {
            return Ok(());
        }
        let mut pending = lock(&self.pending);
        if pending.is_some() {
            return Err(SjsError::runtime(
                "TEMPLATE_RECURSE_DUPLICATE",
                "recurse should only be declared once per template",
            ));
        }
        *pending = Some(u32::try_from(count - 1).unwrap_or(u32::MAX));
        Ok(())
    }

    pub fn pending(&self) -> Option<u32> {
        *lock(&self.pending)
    }

    /// Consumes the pending count after a pass and decides whether another
    /// pass runs. The continuation left pending is already stored.
    pub(crate) fn consume(&self) -> Continuation {
        let mut pending = lock(&self.pending);
        match pending.take() {
            None => Continuation::Stop,
            Some(0) => Continuation::Continue { remaining: None },
            Some(count) => {
                *pending = Some(count - 1);
                Continuation::Continue {
                    remaining: Some(count - 1),
                }
            }
        }
    }
}
