//! Tests for map-reduce stages: ordering, failure policies and empty domains.

use anyhow::Result;
use geoflow::combiners::{SKIPPED_STEPS, SKIPPED_UNITS};
use geoflow::metadata::keys;
use geoflow::prelude::*;
use geoflow::testing::*;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn reduce_with(
    source: CountingSource,
    rows_for: impl Fn(u64) -> usize + Send + Sync + 'static,
    config: ReduceConfig,
) -> Result<(Pipeline, AlgorithmId, RecordingSink)> {
    let sink = RecordingSink::new();
    let (mut p, reduce) = reduction_pipeline(source, StepRows::new(rows_for), config)?;
    let out = p.add("sink", sink.clone());
    p.connect(reduce, out)?;
    Ok((p, out, sink))
}

#[test]
fn output_does_not_depend_on_the_worker_count() -> Result<()> {
    for steps in [0u64, 1, 2, 7, 20] {
        let rows_for = |step: u64| usize::try_from(step % 3).unwrap_or(0);
        let (p1, out1, sink1) = reduce_with(CountingSource::new(steps), rows_for, ReduceConfig::default())?;
        let (p8, out8, sink8) = reduce_with(
            CountingSource::new(steps).with_delay(Duration::from_millis(1)),
            rows_for,
            ReduceConfig::default().with_workers(8),
        )?;
        p1.update(out1)?;
        p8.update(out8)?;

        let sequential = sink1.last().expect("sequential output");
        let parallel = sink8.last().expect("parallel output");
        assert_tables_equal(&parallel, &sequential);
        let expected_rows: u64 = (0..steps).map(|s| s % 3).sum();
        assert_eq!(sequential.num_rows() as u64, expected_rows);
    }
    Ok(())
}

#[test]
fn units_are_merged_in_step_order() -> Result<()> {
    let (p, out, sink) = reduce_with(
        CountingSource::new(6).with_delay(Duration::from_millis(2)),
        |_| 1,
        ReduceConfig::default().with_workers(6),
    )?;
    p.update(out)?;
    let table = sink.last().expect("output");
    assert_eq!(
        column_values(&table, "time_step"),
        (0..6).map(Value::Int).collect::<Vec<_>>()
    );
    Ok(())
}

#[test]
fn only_one_step_emits_rows() -> Result<()> {
    for workers in [1, 3] {
        let source = CountingSource::new(3);
        let (p, out, sink) = reduce_with(
            source.clone(),
            |step| usize::from(step == 1),
            ReduceConfig::default().with_workers(workers),
        )?;
        p.update(out)?;

        assert_eq!(sink.calls(), 1);
        let table = sink.last().expect("output");
        assert_eq!(table.num_rows(), 1);
        assert_eq!(column_values(&table, "time_step"), vec![Value::Int(1)]);
        for step in 0..3 {
            assert_eq!(source.executions(step), 1, "step {step} with {workers} workers");
        }
    }
    Ok(())
}

#[test]
fn an_empty_domain_still_reaches_the_sink() -> Result<()> {
    let (p, out, sink) = reduce_with(CountingSource::new(0), |_| 1, ReduceConfig::default().with_workers(4))?;
    p.update(out)?;

    assert_eq!(sink.calls(), 1);
    let table = sink.last().expect("output");
    assert_eq!(table.num_rows(), 0);
    assert_eq!(table.schema(), &StepRows::schema());
    Ok(())
}

#[test]
fn abort_fails_the_update_without_running_the_sink() -> Result<()> {
    for workers in [1, 4] {
        let source = CountingSource::new(5).failing_on([2]);
        let (p, out, sink) = reduce_with(source, |_| 1, ReduceConfig::default().with_workers(workers))?;

        let err = p.update(out).unwrap_err();
        match &err {
            PipelineError::Reduction {
                algorithm,
                request,
                failed_units,
                ..
            } => {
                assert_eq!(algorithm, "reduce");
                assert_eq!(request.time_step(), Some(2));
                assert_eq!(*failed_units, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("synthetic failure at step 2"));
        assert_eq!(sink.calls(), 0);
    }
    Ok(())
}

#[test]
fn skip_drops_failed_units_and_reports_them() -> Result<()> {
    for workers in [1, 4] {
        let source = CountingSource::new(6).failing_on([1, 4]);
        let (p, out, sink) = reduce_with(
            source,
            |_| 1,
            ReduceConfig::default().with_workers(workers).skip_failures(),
        )?;
        p.update(out)?;

        let table = sink.last().expect("output");
        assert_eq!(
            column_values(&table, "time_step"),
            vec![Value::Int(0), Value::Int(2), Value::Int(3), Value::Int(5)]
        );
        assert_eq!(table.attributes().get(SKIPPED_UNITS), Some(&Value::from(2u64)));
        assert_eq!(
            table.attributes().get(SKIPPED_STEPS),
            Some(&Value::List(vec![Value::from(1u64), Value::from(4u64)]))
        );
        assert_eq!(p.metrics().counter("reduce.skipped"), Some(2));
    }
    Ok(())
}

#[test]
fn panicking_units_are_unit_failures() -> Result<()> {
    let rows_for = |step: u64| {
        assert!(step != 2, "no rows for step {step}");
        1
    };
    for workers in [1, 4] {
        let config = ReduceConfig::default().with_workers(workers);
        let (p, out, sink) = reduce_with(CountingSource::new(4), rows_for, config.clone().skip_failures())?;
        p.update(out)?;
        let table = sink.last().expect("output");
        assert_eq!(
            column_values(&table, "time_step"),
            vec![Value::Int(0), Value::Int(1), Value::Int(3)]
        );
        assert_eq!(table.attributes().get(SKIPPED_UNITS), Some(&Value::from(1u64)));
        assert_eq!(
            table.attributes().get(SKIPPED_STEPS),
            Some(&Value::List(vec![Value::from(2u64)]))
        );

        let (p, out, sink) = reduce_with(CountingSource::new(4), rows_for, config)?;
        let err = p.update(out).unwrap_err();
        assert!(matches!(err, PipelineError::Reduction { failed_units: 1, .. }));
        assert!(err.to_string().contains("no rows for step 2"));
        assert_eq!(sink.calls(), 0);
    }
    Ok(())
}

#[test]
fn nested_reductions_share_the_inner_result() -> Result<()> {
    let source = CountingSource::new(4);
    let mut p = Pipeline::new();
    let src = p.add("source", source.clone());
    let total = p.add("total", MapReduce::new(MeshSum, ReduceConfig::default().with_workers(2))?);
    // every outer step asks for the same whole-domain total
    let per_step = p.add(
        "per_step",
        ProgrammableAlgorithm::new("per_step", |ctx| Ok(ctx.input(0)?.clone()))
            .with_metadata(|inputs| {
                let md = inputs.first().cloned().unwrap_or_default();
                Ok(md.with(keys::NUMBER_OF_TIME_STEPS, 4u64))
            })
            .with_requests(|_, _| Ok(vec![UpstreamRequest::new(0, Request::new())])),
    );
    let outer = p.add("outer", MapReduce::new(MeshSum, ReduceConfig::default().with_workers(2))?);
    p.connect(src, total)?;
    p.connect(total, per_step)?;
    p.connect(per_step, outer)?;

    let (tx, rx) = mpsc::channel();
    let metrics = p.metrics().clone();
    thread::spawn(move || {
        let prw = p
            .update(outer)
            .map(|out| out.as_mesh().and_then(|m| m.array("prw")).map(|v| v[0]));
        let _ = tx.send(prw);
    });
    let prw = rx.recv_timeout(Duration::from_secs(10))??;

    // prw at (0, 0) sums to 0 + 1 + 2 + 3 per outer step
    assert_eq!(prw, Some(24.0));
    for step in 0..4 {
        assert_eq!(source.executions(step), 1);
    }
    assert_eq!(metrics.counter("executions.total"), Some(1));
    assert_eq!(metrics.counter("executions.per_step"), Some(4));
    Ok(())
}

#[test]
fn skipping_every_unit_gives_an_empty_table() -> Result<()> {
    let source = CountingSource::new(3).failing_on([0, 1, 2]);
    let (p, out, sink) = reduce_with(source, |_| 2, ReduceConfig::default().with_workers(2).skip_failures())?;
    p.update(out)?;

    let table = sink.last().expect("output");
    assert_eq!(table.num_rows(), 0);
    assert_eq!(table.attributes().get(SKIPPED_UNITS), Some(&Value::from(3u64)));
    Ok(())
}

#[test]
fn step_ranges_limit_the_fan_out() -> Result<()> {
    let source = CountingSource::new(10);
    let (p, out, sink) = reduce_with(
        source.clone(),
        |_| 1,
        ReduceConfig::default().with_workers(2).steps(Some(3), Some(5)),
    )?;
    p.update(out)?;

    let table = sink.last().expect("output");
    assert_eq!(
        column_values(&table, "time_step"),
        vec![Value::Int(3), Value::Int(4), Value::Int(5)]
    );
    assert_eq!(source.total_executions(), 3);
    assert_eq!(p.metrics().counter("reduce.tasks"), Some(3));
    Ok(())
}

#[test]
fn the_reducer_hides_the_upstream_domain() -> Result<()> {
    let (p, out, _sink) = reduce_with(CountingSource::new(4), |_| 1, ReduceConfig::default())?;
    let md = p.metadata(out)?;
    assert_eq!(md.number_of_time_steps(), None);
    assert_eq!(md.get("reduced_units"), Some(&Value::from(4u64)));
    assert_eq!(md.schema()?, StepRows::schema());
    Ok(())
}

#[test]
fn mesh_sums_follow_step_order() -> Result<()> {
    let mut p = Pipeline::new();
    let src = p.add("source", CountingSource::new(3));
    let reduce = p.add("sum", MapReduce::new(MeshSum, ReduceConfig::default().with_workers(3))?);
    p.connect(src, reduce)?;

    let out = p.update(reduce)?;
    let mesh = out.as_mesh().expect("mesh");
    // prw at (0, 0) is the step number
    assert_eq!(mesh.array("prw").map(|v| v[0]), Some(3.0));
    assert_eq!(mesh.array("ivt").map(|v| v[0]), Some(30.0));
    Ok(())
}

#[test]
fn invalid_configurations_are_refused() {
    assert!(matches!(
        MapReduce::new(TableConcat, ReduceConfig::default().with_workers(0)),
        Err(ConfigError::WorkerCount(0))
    ));
    assert!(matches!(
        MapReduce::new(TableConcat, ReduceConfig::default().steps(Some(5), Some(2))),
        Err(ConfigError::StepRange { first: 5, last: 2 })
    ));
}
