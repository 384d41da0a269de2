//! Tests for the bounded task scheduler.

use geoflow::scheduler::{Scheduler, TaskOutcome};
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn results_come_back_in_submission_order() {
    let scheduler = Scheduler::new(4).unwrap();
    let tasks: Vec<u64> = (0..16).collect();
    // later tasks finish first
    let out = scheduler.run_all(&tasks, false, |&i| {
        thread::sleep(Duration::from_millis(16 - i));
        Ok::<_, String>(i * 10)
    });
    let values: Vec<u64> = out
        .into_iter()
        .map(|o| match o {
            TaskOutcome::Completed(v) => v,
            other => panic!("unexpected outcome {other:?}"),
        })
        .collect();
    assert_eq!(values, (0..16).map(|i| i * 10).collect::<Vec<_>>());
}

#[test]
fn concurrency_never_exceeds_the_worker_count() {
    let scheduler = Scheduler::new(3).unwrap();
    let running = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let tasks: Vec<usize> = (0..24).collect();

    scheduler.run_all(&tasks, false, |_| {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(5));
        running.fetch_sub(1, Ordering::SeqCst);
        Ok::<_, ()>(())
    });
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[test]
fn a_single_worker_runs_inline_in_order() {
    let scheduler = Scheduler::new(1).unwrap();
    let caller = thread::current().id();
    let seen = Mutex::new(Vec::new());
    scheduler.run_all(&[3, 1, 2], false, |&i| {
        assert_eq!(thread::current().id(), caller);
        seen.lock().unwrap().push(i);
        Ok::<_, ()>(())
    });
    assert_eq!(seen.into_inner().unwrap(), vec![3, 1, 2]);
}

#[test]
fn failures_stay_in_their_own_slot() {
    let scheduler = Scheduler::new(4).unwrap();
    let tasks: Vec<u32> = (0..8).collect();
    let out = scheduler.run_all(&tasks, false, |&i| if i % 3 == 0 { Err(i) } else { Ok(i) });
    for (i, outcome) in out.iter().enumerate() {
        let i = u32::try_from(i).unwrap();
        if i % 3 == 0 {
            assert_eq!(outcome, &TaskOutcome::Failed(i));
        } else {
            assert_eq!(outcome, &TaskOutcome::Completed(i));
        }
    }
}

#[test]
fn panics_stay_in_their_own_slot() {
    let scheduler = Scheduler::new(4).unwrap();
    let tasks: Vec<u32> = (0..8).collect();
    let out = scheduler.run_all(&tasks, false, |&i| {
        if i == 5 {
            panic!("task {i} blew up");
        }
        Ok::<_, ()>(i)
    });
    for (i, outcome) in out.iter().enumerate() {
        let i = u32::try_from(i).unwrap();
        if i == 5 {
            assert_eq!(outcome, &TaskOutcome::Panicked("task 5 blew up".into()));
        } else {
            assert_eq!(outcome, &TaskOutcome::Completed(i));
        }
    }
}

#[test]
fn fan_outs_started_from_a_worker_complete() {
    let outer = Scheduler::new(2).unwrap();
    let inner = Scheduler::new(2).unwrap();
    let tasks: Vec<u32> = (0..4).collect();
    let out = outer.run_all(&tasks, false, |&i| {
        let parts = inner.run_all(&[i, i + 10], false, |&j| Ok::<_, ()>(j));
        Ok::<_, ()>(parts.iter().filter(|o| o.is_completed()).count())
    });
    assert!(out.iter().all(|o| *o == TaskOutcome::Completed(2)));
}

#[test]
fn cancellation_skips_tasks_that_have_not_started() {
    let scheduler = Scheduler::new(2).unwrap();
    let tasks: Vec<u32> = (0..200).collect();
    let started = Mutex::new(HashSet::new());
    let out = scheduler.run_all(&tasks, true, |&i| {
        started.lock().unwrap().insert(i);
        if i == 0 {
            return Err("first task failed");
        }
        thread::sleep(Duration::from_millis(2));
        Ok(i)
    });

    assert_eq!(out[0], TaskOutcome::Failed("first task failed"));
    let cancelled = out.iter().filter(|o| **o == TaskOutcome::Cancelled).count();
    assert!(cancelled > 0);
    let started = started.into_inner().unwrap();
    for (i, outcome) in out.iter().enumerate() {
        let ran = started.contains(&u32::try_from(i).unwrap());
        assert_eq!(ran, *outcome != TaskOutcome::Cancelled);
    }
}

#[test]
fn all_cores_uses_at_least_one_worker() {
    assert!(Scheduler::all_cores().unwrap().worker_count() >= 1);
}
