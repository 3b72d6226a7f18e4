use std::sync::Mutex;
use std::time::{Duration, Instant};

use sjs_core::{ErrorKind, SjsError};
use tokio_util::sync::CancellationToken;

use crate::error_map::lock;

/// Cancellation token and per-call deadline consulted at script safe points.
#[derive(Debug, Default)]
pub struct ExecutionLimits {
    token: Option<CancellationToken>,
    timeout: Option<Duration>,
    deadline: Mutex<Option<Instant>>,
}

impl ExecutionLimits {
    pub fn new(token: Option<CancellationToken>, timeout: Option<Duration>) -> Self {
        Self {
            token,
            timeout,
            deadline: Mutex::new(None),
        }
    }

    pub fn token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    /// Starts the deadline for one public call. Nested calls keep the
    /// outermost deadline; only the guard that set it clears it.
    pub fn arm(&self) -> DeadlineGuard<'_> {
        let mut deadline = lock(&self.deadline);
        let armed = match (self.timeout, *deadline) {
            (Some(timeout), None) => {
                *deadline = Some(Instant::now() + timeout);
                true
            }
            _ => false,
        };
        DeadlineGuard {
            limits: self,
            armed,
        }
    }

    pub(crate) fn halt_reason(&self) -> Option<&'static str> {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Some("execution was cancelled");
        }
        match *lock(&self.deadline) {
            Some(deadline) if Instant::now() >= deadline => Some("execution timed out"),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<(), SjsError> {
        match self.halt_reason() {
            Some(reason) => Err(cancelled(reason)),
            None => Ok(()),
        }
    }
}

pub(crate) fn cancelled(reason: &str) -> SjsError {
    SjsError::new(ErrorKind::Cancelled, "SCRIPT_CANCELLED", reason)
}

#[derive(Debug)]
pub struct DeadlineGuard<'a> {
    limits: &'a ExecutionLimits,
    armed: bool,
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *lock(&self.limits.deadline) = None;
        }
    }
}

#[cfg(test)]
mod limits_tests {
    use super::*;

    #[test]
    fn unlimited_never_halts() {
        let limits = ExecutionLimits::default();
        let _guard = limits.arm();
        assert!(limits.check().is_ok());
    }

    #[test]
    fn cancelled_token_halts() {
        let token = CancellationToken::new();
        let limits = ExecutionLimits::new(Some(token.clone()), None);
        assert!(limits.check().is_ok());
        token.cancel();
        let error = limits.check().expect_err("cancelled token should halt");
        assert!(error.is_cancelled());
        assert_eq!(error.code, "SCRIPT_CANCELLED");
    }

    #[test]
    fn deadline_only_applies_while_armed() {
        let limits = ExecutionLimits::new(None, Some(Duration::ZERO));
        assert!(limits.check().is_ok());
        {
            let _outer = limits.arm();
            let inner = limits.arm();
            drop(inner);
            assert!(limits.check().is_err());
        }
        assert!(limits.check().is_ok());
    }
}
