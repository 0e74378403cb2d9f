//! Server-side statement deadline.
//!
//! `SQLite` has no statement timeout setting. A progress handler installed on
//! every connection polls a `StatementDeadline` and interrupts the running
//! statement once it has expired, which frees the connection for the rollback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// VM instructions between two progress handler calls.
#[cfg(feature = "sqlite")]
pub(crate) const PROGRESS_OPS: i32 = 10_000;

#[derive(Debug)]
pub struct StatementDeadline {
    origin: Instant,
    /// Milliseconds after `origin`, `0` while disarmed
    at_ms: AtomicU64,
}

impl StatementDeadline {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            at_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Expire `limit` from now.
    pub fn arm(&self, limit: Duration) {
        let limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
        let at = self.now_ms().saturating_add(limit_ms).max(1);
        self.at_ms.store(at, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.at_ms.store(0, Ordering::Release);
    }

    /// Whether the armed deadline has passed.
    ///
    /// Fires once: the deadline is disarmed on expiry so the rollback that
    /// follows the interrupted statement runs normally.
    pub fn take_expired(&self) -> bool {
        let at = self.at_ms.load(Ordering::Acquire);
        at != 0
            && self.now_ms() >= at
            && self
                .at_ms
                .compare_exchange(at, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }
}

impl Default for StatementDeadline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disarmed_deadline_never_expires() {
        let deadline = StatementDeadline::new();
        assert!(!deadline.take_expired());

        deadline.arm(Duration::ZERO);
        deadline.disarm();
        assert!(!deadline.take_expired());
    }

    #[test]
    fn expired_deadline_fires_once() {
        let deadline = StatementDeadline::new();
        deadline.arm(Duration::ZERO);

        assert!(deadline.take_expired());
        assert!(!deadline.take_expired());
    }

    #[test]
    fn future_deadline_has_not_expired() {
        let deadline = StatementDeadline::new();
        deadline.arm(Duration::from_secs(3600));
        assert!(!deadline.take_expired());
    }
}
