//! "Is it safe to hide right now?"
//!
//! The session polls a [`DismissalCheck`] every debounce interval while the
//! dock is shown. Failures never count as permission to hide.

use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub trait DismissalCheck: Send + Sync {
    fn can_dismiss(&self) -> Result<bool, String>;
}

impl<F> DismissalCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn can_dismiss(&self) -> Result<bool, String> {
        Ok(self())
    }
}

/// Adapts a predicate that can fail, e.g. a pointer query against a platform API.
pub struct Fallible<F>(pub F);

impl<F, E> DismissalCheck for Fallible<F>
where
    F: Fn() -> Result<bool, E> + Send + Sync,
    E: Display,
{
    fn can_dismiss(&self) -> Result<bool, String> {
        (self.0)().map_err(|err| err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Dismiss,
    Keep,
    Failed(String),
}

impl Verdict {
    pub fn allows_dismissal(&self) -> bool {
        matches!(self, Verdict::Dismiss)
    }
}

/// Evaluates the check, converting errors and panics into [`Verdict::Failed`].
pub fn evaluate(check: &dyn DismissalCheck) -> Verdict {
    match catch_unwind(AssertUnwindSafe(|| check.can_dismiss())) {
        Ok(Ok(true)) => Verdict::Dismiss,
        Ok(Ok(false)) => Verdict::Keep,
        Ok(Err(message)) => Verdict::Failed(message),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "predicate panicked".to_string());
            Verdict::Failed(message)
        }
    }
}
