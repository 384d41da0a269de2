//! Tests for the metadata and request passes.

use anyhow::Result;
use geoflow::prelude::*;
use geoflow::testing::*;

#[test]
fn metadata_flows_downstream_without_executing() -> Result<()> {
    let source = CountingSource::new(5);
    let mut p = Pipeline::new();
    let src = p.add("source", source.clone());
    let detect = p.add("detect", ThresholdDetector::new("prw", 3.0, f64::INFINITY)?);
    p.connect(src, detect)?;

    let md = p.metadata(detect)?;
    assert_eq!(md.number_of_time_steps(), Some(5));
    assert_eq!(md.schema()?, ThresholdDetector::schema());
    assert!(md.variables().is_none());
    assert_eq!(source.total_executions(), 0);
    Ok(())
}

#[test]
fn explain_lists_every_distinct_request() -> Result<()> {
    let source = CountingSource::new(4);
    let (mut p, reduce) = reduction_pipeline(
        source.clone(),
        StepRows::new(|_| 1),
        ReduceConfig::default(),
    )?;
    let sink = p.add("sink", RecordingSink::new());
    p.connect(reduce, sink)?;

    let plan = p.explain(sink, Request::new())?;
    let transform = p.upstream(reduce, 0).unwrap();
    let src = p.upstream(transform, 0).unwrap();
    assert_eq!(plan.requests_for(sink), 1);
    assert_eq!(plan.requests_for(reduce), 1);
    assert_eq!(plan.requests_for(transform), 4);
    assert_eq!(plan.requests_for(src), 4);
    assert_eq!(plan.len(), 1 + 1 + 4 + 4);
    assert!(plan.to_string().contains("[map-reduce]"));
    assert_eq!(source.total_executions(), 0);
    Ok(())
}

#[test]
fn the_upstream_sees_the_narrowed_request() -> Result<()> {
    let mut p = Pipeline::new();
    let src = p.add("source", CountingSource::new(3));
    let detect = p.add("detect", ThresholdDetector::new("ivt", 0.0, 1.0)?);
    p.connect(src, detect)?;

    let plan = p.explain(detect, Request::new().with_time_step(2))?;
    let step = plan.step(plan.root()).expect("root step");
    assert_eq!(step.inputs.len(), 1);
    assert_eq!(step.inputs[0].algorithm, src);
    assert_eq!(step.inputs[0].request.time_step(), Some(2));
    assert_eq!(step.inputs[0].request.arrays(), Some(vec!["ivt"]));
    Ok(())
}

#[test]
fn out_of_domain_requests_fail_before_execution() -> Result<()> {
    let source = CountingSource::new(3);
    let mut p = Pipeline::new();
    let src = p.add("source", source.clone());
    let detect = p.add("detect", ThresholdDetector::new("prw", 0.0, 100.0)?);
    p.connect(src, detect)?;

    let err = p.update_with(detect, Request::new().with_time_step(3)).unwrap_err();
    match err {
        PipelineError::InvalidRequest { source: RequestError::OutOfDomain { available, .. }, .. } => {
            assert_eq!(available, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(source.total_executions(), 0);
    Ok(())
}

#[test]
fn unknown_variables_are_reported_against_the_producer() -> Result<()> {
    let source = CountingSource::new(2);
    let mut p = Pipeline::new();
    let src = p.add("source", source.clone());
    let narrow = p.add(
        "narrow",
        ProgrammableAlgorithm::new("narrow", |ctx| Ok(ctx.input(0)?.clone())).with_requests(|_, request| {
            Ok(vec![UpstreamRequest::new(0, request.clone().with_arrays(["tas"]))])
        }),
    );
    p.connect(src, narrow)?;

    let err = p.update(narrow).unwrap_err();
    assert_eq!(err.algorithm(), Some("source"));
    assert!(matches!(
        err,
        PipelineError::InvalidRequest { source: RequestError::UnknownVariable(ref v), .. } if v == "tas"
    ));
    assert_eq!(source.total_executions(), 0);
    Ok(())
}

#[test]
fn extents_outside_the_grid_are_rejected() -> Result<()> {
    let mut p = Pipeline::new();
    let src = p.add("source", CountingSource::new(1));

    let err = p.update_with(src, Request::new().with_extent([0, 4, 0, 2])).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InvalidRequest { source: RequestError::ExtentOutOfBounds { whole: [0, 3, 0, 2], .. }, .. }
    ));

    let out = p.update_with(src, Request::new().with_extent([1, 2, 0, 0]))?;
    let mesh = out.as_mesh().expect("mesh");
    assert_eq!((mesh.nx(), mesh.ny()), (2, 1));
    Ok(())
}

#[test]
fn metadata_errors_name_the_algorithm() -> Result<()> {
    let mut p = Pipeline::new();
    let src = p.add("source", CountingSource::new(1));
    let detect = p.add("detect", ThresholdDetector::new("tas", 0.0, 1.0)?);
    p.connect(src, detect)?;

    let err = p.update(detect).unwrap_err();
    assert!(matches!(err, PipelineError::Metadata { ref algorithm, .. } if algorithm == "detect"));
    Ok(())
}

#[test]
fn malformed_index_values_are_rejected() -> Result<()> {
    let mut p = Pipeline::new();
    let src = p.add("source", CountingSource::new(3));
    let avg = p.add("avg", TemporalAverage::new(3, FilterType::Backward)?);
    p.connect(src, avg)?;

    let err = p
        .update_with(avg, Request::new().with("time_step", "two"))
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InvalidRequest { source: RequestError::Malformed(ref key), .. } if key == "time_step"
    ));
    Ok(())
}

#[test]
fn algorithms_can_refuse_a_request() -> Result<()> {
    let source = CountingSource::new(2);
    let mut p = Pipeline::new();
    let src = p.add("source", source.clone());
    let picky = p.add(
        "picky",
        ProgrammableAlgorithm::new("picky", |ctx| Ok(ctx.input(0)?.clone())).with_requests(|_, request| {
            anyhow::ensure!(request.extent().is_some(), "an extent is required");
            Ok(vec![UpstreamRequest::new(0, request.clone())])
        }),
    );
    p.connect(src, picky)?;

    let err = p.update(picky).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidRequest { source: RequestError::Rejected(_), .. }));
    assert!(err.to_string().contains("an extent is required"));
    assert_eq!(source.total_executions(), 0);

    p.update_with(picky, Request::new().with_extent([0, 1, 0, 1]))?;
    assert_eq!(source.total_executions(), 1);
    Ok(())
}
