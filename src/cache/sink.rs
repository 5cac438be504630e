//! Error sink: where caught facade errors are reported

use crate::error::CacheError;
use tracing::error;

/// Receives every error the facade catches, in both error modes
pub trait ErrorSink: Send + Sync {
    /// `context` names the facade operation, e.g. `"save"`
    fn report(&self, error: &CacheError, context: &str);
}

/// Default sink logging through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, err: &CacheError, context: &str) {
        error!(context, error = %err, "cache operation failed");
    }
}

impl<F> ErrorSink for F
where
    F: Fn(&CacheError, &str) + Send + Sync,
{
    fn report(&self, error: &CacheError, context: &str) {
        self(error, context)
    }
}
