//! Progress reporting for the expensive pipeline stages.
//!
//! Point attribution and raster evaluation can run over hundreds of
//! thousands of items. They report through [`ProgressCallback`] so the
//! library stays independent of how (or whether) progress is drawn.

use std::sync::Arc;

/// Receives progress updates from a running stage.
///
/// Implementations must be `Send + Sync`: updates arrive from `rayon`
/// worker threads.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work.
    fn set_total(&self, total: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message shown next to the indicator.
    fn set_message(&self, msg: String);

    /// Mark the stage complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores every update. Used by tests and library callers that do not
/// draw progress.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
