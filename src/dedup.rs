use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use alloy::primitives::TxHash;
use parking_lot::Mutex;

use crate::error::PipelineError;

/// Default number of transaction hashes remembered by a [`TxnDeduper`].
pub const DEFAULT_DEDUP_CAPACITY: usize = 100;

#[derive(Debug)]
struct Inner {
    seen: HashSet<TxHash>,
    order: VecDeque<TxHash>,
    capacity: usize,
}

/// Bounded recency cache of processed transaction hashes.
///
/// Eviction is by insertion order only; looking a hash up does not refresh it. A transaction that
/// reappears after more than `capacity` newer transactions is processed again.
///
/// Clones share the same cache, so several pollers can deduplicate against each other.
#[derive(Clone, Debug)]
pub struct TxnDeduper {
    inner: Arc<Mutex<Inner>>,
}

impl TxnDeduper {
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidDedupCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, PipelineError> {
        if capacity == 0 {
            return Err(PipelineError::InvalidDedupCapacity);
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                seen: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                capacity,
            })),
        })
    }

    /// Returns `true` the first time `txn` is offered and records it; `false` while it is still
    /// remembered.
    pub fn should_process(&self, txn: TxHash) -> bool {
        let mut inner = self.inner.lock();
        if !inner.seen.insert(txn) {
            return false;
        }
        inner.order.push_back(txn);
        while inner.order.len() > inner.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
                trace!(txn_hash = %evicted, "Evicted transaction from dedup cache");
            }
        }
        true
    }

    #[must_use]
    pub fn contains(&self, txn: &TxHash) -> bool {
        self.inner.lock().seen.contains(txn)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}

impl Default for TxnDeduper {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                seen: HashSet::with_capacity(DEFAULT_DEDUP_CAPACITY),
                order: VecDeque::with_capacity(DEFAULT_DEDUP_CAPACITY),
                capacity: DEFAULT_DEDUP_CAPACITY,
            })),
        }
    }
}
