//! Tests for moving averages over timesteps.

use anyhow::Result;
use geoflow::prelude::*;
use geoflow::testing::*;


fn averaged(source: CountingSource, width: usize, filter: FilterType) -> Result<(Pipeline, AlgorithmId)> {
    let mut p = Pipeline::new();
    let src = p.add("source", source);
    let avg = p.add("average", TemporalAverage::new(width, filter)?);
    p.connect(src, avg)?;
    Ok((p, avg))
}

fn prw_origin(out: &Dataset) -> f64 {
    out.as_mesh().and_then(|m| m.array("prw")).map_or(f64::NAN, |v| v[0])
}

#[test]
fn windows_average_the_surrounding_steps() -> Result<()> {
    let (p, avg) = averaged(CountingSource::new(6), 3, FilterType::Centered)?;
    let out = p.update_with(avg, Request::new().with_time_step(4))?;
    // prw at (0, 0) is the step number
    assert_approx_eq!(prw_origin(&out), 4.0);
    assert_eq!(out.time_step(), Some(4));
    let ivt = out.as_mesh().and_then(|m| m.array("ivt")).map(<[f64]>::to_vec);
    assert_approx_eq!(ivt.map_or(f64::NAN, |v| v[0]), 40.0);
    Ok(())
}

#[test]
fn windows_are_clipped_at_the_edges() -> Result<()> {
    let (p, avg) = averaged(CountingSource::new(6), 3, FilterType::Forward)?;
    let last = p.update_with(avg, Request::new().with_time_step(5))?;
    assert_approx_eq!(prw_origin(&last), 5.0);
    let fourth = p.update_with(avg, Request::new().with_time_step(4))?;
    assert_approx_eq!(prw_origin(&fourth), 4.5);

    let (p, avg) = averaged(CountingSource::new(6), 3, FilterType::Backward)?;
    let first = p.update_with(avg, Request::new().with_time_step(0))?;
    assert_approx_eq!(prw_origin(&first), 0.0);
    Ok(())
}

#[test]
fn the_window_is_planned_as_separate_requests() -> Result<()> {
    let (p, avg) = averaged(CountingSource::new(6), 5, FilterType::Centered)?;
    let plan = p.explain(avg, Request::new().with_time_step(2))?;
    let root = plan.step(plan.root()).expect("root step");
    assert_eq!(root.inputs.len(), 5);
    assert_eq!(plan.len(), 6);
    Ok(())
}

#[test]
fn overlapping_windows_share_upstream_steps() -> Result<()> {
    for workers in [1, 4] {
        let source = CountingSource::new(6);
        let (mut p, avg) = averaged(source.clone(), 3, FilterType::Backward)?;
        let sum = p.add("sum", MapReduce::new(MeshSum, ReduceConfig::default().with_workers(workers))?);
        p.connect(avg, sum)?;

        let out = p.update(sum)?;
        // averages at (0, 0) are 0, 0.5, 1, 2, 3 and 4
        assert_approx_eq!(prw_origin(&out), 10.5);
        for step in 0..6 {
            assert_eq!(source.executions(step), 1, "step {step} with {workers} workers");
        }
        assert_eq!(p.metrics().counter("executions.average"), Some(6));
    }
    Ok(())
}

#[test]
fn steps_outside_the_domain_are_refused() -> Result<()> {
    let (p, avg) = averaged(CountingSource::new(3), 3, FilterType::Backward)?;
    assert!(p.update_with(avg, Request::new().with_time_step(3)).is_err());
    Ok(())
}
