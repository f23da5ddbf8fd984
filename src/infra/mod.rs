//! Execution backends.

pub mod inline;
pub mod threads;

use std::any::Any;
use std::sync::Arc;

pub use inline::InlineBackend;
pub use threads::ThreadBackend;

use crate::config::BackendKind;
use crate::core::Backend;

/// Instantiate the built-in backend for `kind`.
#[must_use]
pub fn select_backend<A, R>(kind: BackendKind) -> Arc<dyn Backend<A, R>>
where
    A: Send + 'static,
    R: Send + 'static,
{
    match kind {
        BackendKind::Inline => Arc::new(InlineBackend),
        BackendKind::Threads => Arc::new(ThreadBackend::new()),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "actor panicked".to_string())
}
