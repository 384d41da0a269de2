//! Tests for update cycles, caching across cycles and shared upstreams.

use anyhow::Result;
use geoflow::prelude::*;
use geoflow::testing::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn counting_passthrough(name: &str, counter: Arc<AtomicUsize>) -> ProgrammableAlgorithm {
    ProgrammableAlgorithm::new(name, move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(ctx.input(0)?.clone())
    })
}

#[test]
fn repeated_updates_give_the_same_output() -> Result<()> {
    let (mut p, reduce) = reduction_pipeline(
        CountingSource::new(5),
        StepRows::new(|step| usize::try_from(step).unwrap_or(0)),
        ReduceConfig::default().with_workers(3),
    )?;
    let sink = RecordingSink::new();
    let out = p.add("sink", sink.clone());
    p.connect(reduce, out)?;

    p.update(out)?;
    let first = sink.last().expect("first");
    p.update(out)?;
    let second = sink.last().expect("second");
    assert_tables_equal(&second, &first);
    assert_eq!(first.num_rows(), 1 + 2 + 3 + 4);
    assert_eq!(sink.calls(), 2);
    Ok(())
}

#[test]
fn per_update_outputs_are_recomputed_each_cycle() -> Result<()> {
    let source = CountingSource::new(2);
    let (mut p, reduce) = reduction_pipeline(source.clone(), StepRows::new(|_| 1), ReduceConfig::default())?;
    let out = p.add("sink", RecordingSink::new());
    p.connect(reduce, out)?;

    p.update(out)?;
    p.update(out)?;
    p.update(out)?;
    assert_eq!(source.executions(0), 3);
    assert_eq!(source.executions(1), 3);
    assert_eq!(p.metrics().counter("updates"), Some(3));
    Ok(())
}

#[test]
fn persistent_outputs_survive_cycles_until_modified() -> Result<()> {
    let executed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&executed);
    let source = ProgrammableAlgorithm::source(
        "constant",
        || Ok(Metadata::new()),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let table = Table::from_rows(Schema::new().with("v", ColumnType::Int), [vec![Value::Int(7)]])?;
            Ok(Dataset::Table(table))
        },
    )
    .with_cache_policy(CachePolicy::Persistent);

    let mut p = Pipeline::new();
    let src = p.add("constant", source);
    let sink = p.add("sink", RecordingSink::new());
    p.connect(src, sink)?;

    p.update(sink)?;
    p.update(sink)?;
    assert_eq!(executed.load(Ordering::SeqCst), 1);
    assert!(p.metrics().counter("cache.hits").unwrap_or(0) >= 1);

    p.set_modified();
    p.update(sink)?;
    assert_eq!(executed.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn shared_upstreams_run_once_per_request() -> Result<()> {
    let source = CountingSource::new(1);
    let left_runs = Arc::new(AtomicUsize::new(0));
    let right_runs = Arc::new(AtomicUsize::new(0));

    let mut p = Pipeline::new();
    let src = p.add("source", source.clone());
    let left = p.add("left", counting_passthrough("left", Arc::clone(&left_runs)));
    let right = p.add("right", counting_passthrough("right", Arc::clone(&right_runs)));
    let join = p.add(
        "join",
        ProgrammableAlgorithm::new("join", |ctx| {
            let a = ctx.mesh(0)?;
            let b = ctx.mesh(1)?;
            anyhow::ensure!(a == b, "branches disagree");
            Ok(Dataset::Mesh(a.clone()))
        })
        .with_input_ports(2),
    );
    p.connect(src, left)?;
    p.connect(src, right)?;
    p.connect_ports(left, 0, join, 0)?;
    p.connect_ports(right, 0, join, 1)?;

    p.update(join)?;
    assert_eq!(source.total_executions(), 1);
    assert_eq!(left_runs.load(Ordering::SeqCst), 1);
    assert_eq!(right_runs.load(Ordering::SeqCst), 1);
    assert_eq!(p.metrics().counter("executions.source"), Some(1));
    Ok(())
}

#[test]
fn computation_errors_name_the_failing_stage_and_request() -> Result<()> {
    let mut p = Pipeline::new();
    let src = p.add("source", CountingSource::new(3).failing_on([1]));
    let detect = p.add("detect", ThresholdDetector::new("prw", 0.0, 100.0)?);
    p.connect(src, detect)?;

    let err = p.update_with(detect, Request::new().with_time_step(1)).unwrap_err();
    assert_eq!(err.algorithm(), Some("source"));
    assert_eq!(err.request().and_then(Request::time_step), Some(1));
    assert!(err.to_string().contains("synthetic failure at step 1"));

    let ok = p.update_with(detect, Request::new().with_time_step(2))?;
    assert_eq!(ok.time_step(), Some(2));
    Ok(())
}

#[test]
fn concurrent_updates_are_serialized() -> Result<()> {
    let source = CountingSource::new(4);
    let (mut p, reduce) = reduction_pipeline(
        source.clone(),
        StepRows::new(|_| 1),
        ReduceConfig::default().with_workers(2),
    )?;
    let sink = RecordingSink::new();
    let out = p.add("sink", sink.clone());
    p.connect(reduce, out)?;

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..3).map(|_| s.spawn(|| p.update(out).map(|_| ()))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(sink.calls(), 3);
    assert_eq!(sink.last().expect("output").num_rows(), 4);
    assert_eq!(source.total_executions(), 12);
    Ok(())
}

#[test]
fn the_detector_pipeline_reports_events() -> Result<()> {
    let mut p = Pipeline::new();
    let src = p.add("source", CountingSource::new(4));
    // prw at (i, j) is step + i + j on a 4x3 grid, so the maximum is step + 5
    let detect = p.add("detect", ThresholdDetector::new("prw", 7.0, f64::INFINITY)?);
    let reduce = p.add("reduce", MapReduce::new(TableConcat, ReduceConfig::default().with_workers(2))?);
    let sink = RecordingSink::new();
    let out = p.add("sink", sink.clone());
    p.connect(src, detect)?;
    p.connect(detect, reduce)?;
    p.connect(reduce, out)?;

    p.update(out)?;
    let table = sink.last().expect("output");
    assert_eq!(column_values(&table, "time_step"), vec![Value::Int(2), Value::Int(3)]);
    // step 2: only (3, 2) reaches 7; step 3: (3, 1), (2, 2), (3, 2)
    assert_eq!(column_values(&table, "cells"), vec![Value::Int(1), Value::Int(3)]);
    assert_eq!(column_values(&table, "max_value"), vec![Value::from(7.0), Value::from(8.0)]);
    Ok(())
}
