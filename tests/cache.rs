//! Tests for the single-flight execution cache.

use anyhow::{Result, anyhow};
use geoflow::cache::{CacheKey, ExecutionCache};
use geoflow::error::SharedError;
use geoflow::prelude::*;
use geoflow::testing::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn some_id() -> AlgorithmId {
    let mut p = Pipeline::new();
    p.add("source", CountingSource::new(1))
}

fn failure(key: &CacheKey) -> PipelineError {
    PipelineError::Computation {
        algorithm: "source".into(),
        request: key.request.clone(),
        source: SharedError::new(anyhow!("disk on fire")),
    }
}

#[test]
fn concurrent_callers_share_one_computation() {
    let cache = ExecutionCache::new();
    let key = CacheKey::new(some_id(), Request::new().with_time_step(0));
    let computed = AtomicUsize::new(0);
    let barrier = Barrier::new(8);

    let results: Vec<DatasetRef> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    cache
                        .get_or_compute(&key, false, || {
                            computed.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(Arc::new(Dataset::Empty))
                        })
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(computed.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 7);
}

#[test]
fn structurally_equal_requests_hit_the_same_entry() {
    let cache = ExecutionCache::new();
    let id = some_id();
    let a = CacheKey::new(id, Request::new().with_time_step(1).with_arrays(["prw"]));
    let b = CacheKey::new(id, Request::new().with_arrays(["prw"]).with_time_step(1));

    let first = cache.get_or_compute(&a, false, || Ok(Arc::new(Dataset::Empty))).unwrap();
    let second = cache
        .get_or_compute(&b, false, || panic!("must not recompute"))
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);
}

#[test]
fn failures_reach_every_waiter_and_are_not_cached() {
    let cache = ExecutionCache::new();
    let key = CacheKey::new(some_id(), Request::new());
    let barrier = Barrier::new(4);
    let computed = AtomicUsize::new(0);

    let outcomes: Vec<bool> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    cache
                        .get_or_compute(&key, false, || {
                            computed.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(100));
                            Err(failure(&key))
                        })
                        .is_err()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(outcomes.iter().all(|failed| *failed));
    assert_eq!(computed.load(Ordering::SeqCst), 1);
    assert!(cache.is_empty());

    let retried = cache.get_or_compute(&key, false, || Ok(Arc::new(Dataset::Empty)));
    assert!(retried.is_ok());
    assert!(cache.get(&key).is_some());
}

#[test]
fn begin_cycle_keeps_only_ready_persistent_entries() {
    let cache = ExecutionCache::new();
    let id = some_id();
    let kept = CacheKey::new(id, Request::new().with_time_step(0));
    let dropped = CacheKey::new(id, Request::new().with_time_step(1));
    cache.get_or_compute(&kept, true, || Ok(Arc::new(Dataset::Empty))).unwrap();
    cache.get_or_compute(&dropped, false, || Ok(Arc::new(Dataset::Empty))).unwrap();

    cache.begin_cycle();
    assert!(cache.get(&kept).is_some());
    assert!(cache.get(&dropped).is_none());

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn a_panicking_owner_frees_its_slot() -> Result<()> {
    let cache = ExecutionCache::new();
    let key = CacheKey::new(some_id(), Request::new());

    let owner = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        cache.get_or_compute(&key, false, || panic!("boom"))
    }));
    assert!(owner.is_err());
    assert!(cache.is_empty());

    let out = cache.get_or_compute(&key, false, || Ok(Arc::new(Dataset::Empty)))?;
    assert_eq!(out.kind(), "empty");
    Ok(())
}
