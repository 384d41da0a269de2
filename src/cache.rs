//! Single-flight execution cache.
//!
//! Outputs are memoized by [`CacheKey`] (algorithm identity plus structural
//! request). The first caller for a key becomes its owner and computes; any
//! concurrent caller for the same key blocks on that slot until the owner
//! publishes, then receives the same `Arc`. Failures are published to every
//! waiter and the slot is removed, so a later demand retries.
//!
//! Slots live in a sharded [`DashMap`]; the map lock is only held long enough
//! to find or insert a slot, never while computing, so unrelated keys never
//! wait on each other.

use crate::dataset::DatasetRef;
use crate::error::{PipelineError, SharedError};
use crate::node_id::AlgorithmId;
use crate::request::Request;
use anyhow::anyhow;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Identity of one stage output.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub algorithm: AlgorithmId,
    pub request: Request,
}

impl CacheKey {
    #[must_use]
    pub fn new(algorithm: AlgorithmId, request: Request) -> Self {
        Self { algorithm, request }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{} {}", self.algorithm, self.request)
    }
}

enum SlotState {
    Pending,
    Ready(DatasetRef),
    Failed(PipelineError),
}

struct Slot {
    state: Mutex<SlotState>,
    published: Condvar,
    persistent: bool,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: SlotState) {
        *self.lock() = state;
        self.published.notify_all();
    }

    fn wait(&self) -> Result<DatasetRef, PipelineError> {
        let mut state = self.lock();
        loop {
            match &*state {
                SlotState::Pending => {
                    state = self.published.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                SlotState::Ready(ds) => return Ok(Arc::clone(ds)),
                SlotState::Failed(err) => return Err(err.clone()),
            }
        }
    }

    fn is_ready(&self) -> bool {
        matches!(*self.lock(), SlotState::Ready(_))
    }
}

/// Releases waiters with an error if the owner unwinds before publishing.
struct OwnerGuard<'a> {
    cache: &'a ExecutionCache,
    key: &'a CacheKey,
    slot: &'a Arc<Slot>,
    armed: bool,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let err = PipelineError::Computation {
                algorithm: self.key.algorithm.to_string(),
                request: self.key.request.clone(),
                source: SharedError::new(anyhow!("computation panicked")),
            };
            self.cache.fail(self.key, self.slot, err);
        }
    }
}

/// Hit/miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Default)]
pub struct ExecutionCache {
    slots: DashMap<CacheKey, Arc<Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ExecutionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached output for `key`, computing it at most once across
    /// all concurrent callers.
    ///
    /// # Errors
    /// Returns the error of the single computation to the owner and to every
    /// waiter.
    pub fn get_or_compute<F>(&self, key: &CacheKey, persistent: bool, compute: F) -> Result<DatasetRef, PipelineError>
    where
        F: FnOnce() -> Result<DatasetRef, PipelineError>,
    {
        let (slot, owner) = match self.slots.entry(key.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let slot = Arc::new(Slot {
                    state: Mutex::new(SlotState::Pending),
                    published: Condvar::new(),
                    persistent,
                });
                entry.insert(Arc::clone(&slot));
                (slot, true)
            }
        };

        if !owner {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return slot.wait();
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut guard = OwnerGuard {
            cache: self,
            key,
            slot: &slot,
            armed: true,
        };
        let result = compute();
        guard.armed = false;
        match &result {
            Ok(ds) => slot.publish(SlotState::Ready(Arc::clone(ds))),
            Err(err) => self.fail(key, &slot, err.clone()),
        }
        result
    }

    fn fail(&self, key: &CacheKey, slot: &Arc<Slot>, err: PipelineError) {
        self.slots.remove_if(key, |_, current| Arc::ptr_eq(current, slot));
        slot.publish(SlotState::Failed(err));
    }

    /// Ready output for `key`, without computing.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<DatasetRef> {
        let slot = Arc::clone(self.slots.get(key)?.value());
        let state = slot.lock();
        match &*state {
            SlotState::Ready(ds) => Some(Arc::clone(ds)),
            _ => None,
        }
    }

    /// Start an update cycle: drop everything except ready persistent entries.
    pub fn begin_cycle(&self) {
        self.slots.retain(|_, slot| slot.persistent && slot.is_ready());
    }

    /// Drop every entry, persistent ones included.
    pub fn clear(&self) {
        self.slots.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
