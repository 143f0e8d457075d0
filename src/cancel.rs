//! Cancellation carrying the error that caused it.
use crate::error::Error;

use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// A cancellation signal plus the first reason it was fired for.
///
/// Any number of workers may call [`cancel`](CancelCause::cancel); only the
/// first error is kept. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancelCause {
    token: CancellationToken,
    reason: Arc<Mutex<Option<Error>>>,
}

impl CancelCause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal, recording `reason` if no reason was recorded yet.
    ///
    /// Returns `true` if `reason` was the one recorded.
    pub fn cancel(&self, reason: Error) -> bool {
        let first = {
            let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        };
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal fires.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Take the recorded reason, leaving none behind.
    pub fn take_reason(&self) -> Option<Error> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn first_reason_wins() {
        let cause = CancelCause::new();
        let sibling = cause.clone();
        assert!(!cause.is_cancelled());

        assert!(sibling.cancel(Error::from_kind(ErrorKind::Integrity, "first")));
        assert!(!cause.cancel(Error::from_kind(ErrorKind::Transient, "second")));

        assert!(cause.is_cancelled());
        let reason = cause.take_reason().unwrap();
        assert_eq!(reason.kind(), ErrorKind::Integrity);
        assert!(cause.take_reason().is_none());
    }
}
