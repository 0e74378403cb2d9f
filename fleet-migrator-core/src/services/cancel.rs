//! Cooperative cancellation of a fleet run

use std::sync::Arc;

use tokio::sync::watch;

/// Cancellation flag shared between the caller and a running fleet migration.
///
/// Cancellation is only observed at script boundaries: a script transaction in
/// flight always runs to commit or rollback.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}
