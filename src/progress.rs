//! Progress aggregation across concurrently transferred parts.
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Progress of a whole transfer, as reported to an [`OnProgress`] callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes committed plus bytes in flight.
    pub transferred: u64,
    /// Size of the whole object, if known.
    pub total: Option<u64>,
}

/// Receives progress updates.
///
/// Updates are delivered in order and never decrease within one attempt.
/// The callback runs while the aggregator is locked, so it must not block.
pub trait OnProgress: Send + Sync {
    fn on_progress(&self, progress: &TransferProgress);
}

impl<F> OnProgress for F
where
    F: Fn(&TransferProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &TransferProgress) {
        (self)(progress)
    }
}

#[derive(Debug, Default)]
struct Inner {
    committed: u64,
    in_flight: HashMap<u64, u64>,
    in_flight_sum: u64,
    next_key: u64,
    reported: u64,
}

/// Aggregates per-part byte counts into one monotonic total.
#[derive(Clone)]
pub struct Progresses {
    inner: Arc<Mutex<Inner>>,
    total: Option<u64>,
    callback: Option<Arc<dyn OnProgress>>,
}

impl Progresses {
    pub fn new(total: Option<u64>, callback: Option<Arc<dyn OnProgress>>) -> Self {
        Self {
            inner: Arc::default(),
            total,
            callback,
        }
    }

    /// Start tracking a new part of `size` bytes.
    pub fn add_part(&self, size: u64) -> PartProgress {
        let mut inner = self.lock();
        let key = inner.next_key;
        inner.next_key += 1;
        inner.in_flight.insert(key, 0);
        PartProgress {
            key,
            size,
            progresses: self.clone(),
        }
    }

    /// Committed bytes plus bytes in flight.
    pub fn total(&self) -> u64 {
        let inner = self.lock();
        inner.committed + inner.in_flight_sum
    }

    /// Bytes of parts that completed.
    pub fn committed(&self) -> u64 {
        self.lock().committed
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<F: FnOnce(&mut Inner)>(&self, f: F) {
        let mut inner = self.lock();
        f(&mut inner);
        let mut transferred = inner.committed + inner.in_flight_sum;
        if let Some(total) = self.total {
            transferred = transferred.min(total);
        }
        if transferred <= inner.reported {
            return;
        }
        inner.reported = transferred;
        if let Some(callback) = &self.callback {
            callback.on_progress(&TransferProgress {
                transferred,
                total: self.total,
            });
        }
    }
}

impl Debug for Progresses {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progresses")
            .field("inner", &*self.lock())
            .field("total", &self.total)
            .field("callback", &self.callback.as_ref().map(|_| "OnProgress"))
            .finish()
    }
}

/// Handle for reporting the progress of one part.
///
/// In-flight counts only ever grow, so a part that is re-sent after a failure
/// does not make the reported total go backwards.
#[derive(Debug, Clone)]
pub struct PartProgress {
    key: u64,
    size: u64,
    progresses: Progresses,
}

impl PartProgress {
    /// Size of the part being tracked.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Record that `n` bytes of this part have been sent or received.
    pub fn set_in_flight(&self, n: u64) {
        let n = n.min(self.size);
        self.progresses.update(|inner| {
            let Some(current) = inner.in_flight.get_mut(&self.key) else {
                return;
            };
            if n > *current {
                inner.in_flight_sum += n - *current;
                *current = n;
            }
        });
    }

    /// Record `n` more bytes of this part.
    pub fn add_in_flight(&self, n: u64) {
        self.progresses.update(|inner| {
            let Some(current) = inner.in_flight.get_mut(&self.key) else {
                return;
            };
            let next = current.saturating_add(n).min(self.size);
            inner.in_flight_sum += next - *current;
            *current = next;
        });
    }

    /// The part is done: move it from in flight to committed.
    pub fn commit(&self) {
        self.progresses.update(|inner| {
            let Some(current) = inner.in_flight.remove(&self.key) else {
                return;
            };
            inner.in_flight_sum -= current;
            inner.committed += self.size;
        });
    }
}
