//! Tests for metrics collection.

use anyhow::Result;
use geoflow::metrics::{CounterMetric, Metric, MetricsCollector};
use geoflow::prelude::*;
use geoflow::testing::*;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

struct Exploding;

impl Metric for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    fn value(&self) -> serde_json::Value {
        panic!("metric failed")
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn counters_accumulate_and_can_be_reset() {
    let metrics = MetricsCollector::new();
    assert_eq!(metrics.counter("files"), None);
    metrics.increment_counter("files", 2);
    metrics.increment_counter("files", 3);
    assert_eq!(metrics.counter("files"), Some(5));

    metrics.set_counter("files", 1);
    assert_eq!(metrics.counter("files"), Some(1));

    metrics.register(Box::new(CounterMetric::with_value("rows", 40)));
    assert_eq!(metrics.counter("rows"), Some(40));
}

#[test]
fn clones_share_storage() {
    let metrics = MetricsCollector::new();
    let clone = metrics.clone();
    clone.increment_counter("updates", 1);
    assert_eq!(metrics.counter("updates"), Some(1));
}

#[test]
fn a_panicking_metric_does_not_disable_the_collector() {
    let metrics = MetricsCollector::new();
    metrics.register(Box::new(Exploding));
    // the panic poisons the lock mid-snapshot
    assert!(catch_unwind(AssertUnwindSafe(|| metrics.snapshot())).is_err());

    metrics.increment_counter("updates", 1);
    metrics.record_duration("time.update", Duration::from_millis(1));
    assert_eq!(metrics.counter("updates"), Some(1));
    metrics.record_start();
    metrics.record_end();
    assert!(metrics.elapsed().is_some());
}

#[test]
fn timers_count_events() {
    let metrics = MetricsCollector::new();
    let out = metrics.time("time.read", || 7);
    assert_eq!(out, 7);
    metrics.record_duration("time.read", Duration::from_millis(20));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot["time.read"]["events"], 2);
    assert!(snapshot["time.read"]["max_ms"].as_f64().unwrap_or(0.0) >= 20.0);
    // a timer is not a counter
    assert_eq!(metrics.counter("time.read"), None);
}

#[test]
fn json_reports_include_the_run_time() -> Result<()> {
    let metrics = MetricsCollector::new();
    metrics.increment_counter("cache.hits", 4);
    assert!(metrics.to_json().get("execution_time_ms").is_none());

    metrics.record_start();
    std::thread::sleep(Duration::from_millis(5));
    metrics.record_end();
    assert!(metrics.elapsed().is_some_and(|d| d >= Duration::from_millis(5)));

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("metrics.json");
    metrics.save_to_file(&path)?;
    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(saved["cache.hits"]["value"], 4);
    assert!(saved["execution_time_ms"]["value"].as_u64().is_some_and(|ms| ms >= 5));
    Ok(())
}

#[test]
fn updates_record_per_stage_counts() -> Result<()> {
    let (mut p, reduce) = reduction_pipeline(
        CountingSource::new(4),
        StepRows::new(|_| 1),
        ReduceConfig::default().with_workers(2),
    )?;
    let out = p.add("sink", RecordingSink::new());
    p.connect(reduce, out)?;
    p.update(out)?;

    let metrics = p.metrics();
    assert_eq!(metrics.counter("executions.source"), Some(4));
    assert_eq!(metrics.counter("executions.transform"), Some(4));
    assert_eq!(metrics.counter("executions.reduce"), Some(1));
    assert_eq!(metrics.counter("executions.sink"), Some(1));
    assert_eq!(metrics.counter("reduce.tasks"), Some(4));
    assert_eq!(metrics.counter("updates"), Some(1));
    assert!(metrics.snapshot().contains_key("time.update"));
    Ok(())
}

#[test]
fn failed_plans_are_still_timed() -> Result<()> {
    let mut p = Pipeline::new();
    let src = p.add("source", CountingSource::new(3));
    assert!(p.update_with(src, Request::new().with_time_step(5)).is_err());

    let metrics = p.metrics();
    assert!(metrics.snapshot().contains_key("time.update"));
    assert_eq!(metrics.counter("updates"), None);
    assert_eq!(metrics.counter("cache.misses"), Some(0));
    Ok(())
}
