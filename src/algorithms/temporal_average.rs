//! Moving average over timesteps.
//!
//! For the active step `s` and a window of `w` steps:
//!
//! | filter     | steps averaged                |
//! |------------|-------------------------------|
//! | `Backward` | `s - w + 1 ..= s`             |
//! | `Forward`  | `s ..= s + w - 1`             |
//! | `Centered` | `s - w / 2 ..= s + w / 2`     |
//!
//! The window is clipped to the domain, so steps near either end average
//! fewer inputs. Overlapping windows of neighbouring steps request the same
//! upstream steps, which the execution cache computes once.

use crate::algorithm::{Algorithm, ExecuteContext, UpstreamRequest};
use crate::dataset::{CartesianMesh, Dataset};
use crate::error::ConfigError;
use crate::metadata::Metadata;
use crate::request::Request;
use anyhow::{Result, anyhow, ensure};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Backward,
    Forward,
    Centered,
}

#[derive(Clone, Debug)]
pub struct TemporalAverage {
    filter_width: usize,
    filter_type: FilterType,
}

impl TemporalAverage {
    /// # Errors
    /// Returns a [`ConfigError`] for a zero width, or an even width with a
    /// centered filter.
    pub fn new(filter_width: usize, filter_type: FilterType) -> Result<Self, ConfigError> {
        if filter_width == 0 {
            return Err(ConfigError::FilterWidth);
        }
        if filter_type == FilterType::Centered && filter_width % 2 == 0 {
            return Err(ConfigError::CenteredWidth(filter_width));
        }
        Ok(Self {
            filter_width,
            filter_type,
        })
    }

    /// Steps averaged for `active` in a domain of `size` steps.
    #[must_use]
    pub fn window(&self, active: u64, size: u64) -> RangeInclusive<u64> {
        let w = self.filter_width as u64;
        let (before, after) = match self.filter_type {
            FilterType::Backward => (w - 1, 0),
            FilterType::Forward => (0, w - 1),
            FilterType::Centered => (w / 2, w / 2),
        };
        let last = size.saturating_sub(1);
        active.saturating_sub(before)..=active.saturating_add(after).min(last)
    }
}

impl Algorithm for TemporalAverage {
    fn name(&self) -> &str {
        "temporal_average"
    }

    fn upstream_requests(&self, inputs: &[Metadata], request: &Request) -> Result<Vec<UpstreamRequest>> {
        let md = inputs.first().ok_or_else(|| anyhow!("no upstream metadata"))?;
        let key = md.index_request_key();
        let size = md
            .domain_size()
            .ok_or_else(|| anyhow!("upstream does not declare \"{}\"", md.index_initializer_key()))?;
        let active = match request.get(key) {
            Some(v) => v.as_u64().ok_or_else(|| anyhow!("request key \"{key}\" is malformed"))?,
            None => 0,
        };
        ensure!(active < size, "step {active} is outside the {size} available steps");
        Ok(self
            .window(active, size)
            .map(|step| UpstreamRequest::new(0, request.clone().with(key, step)))
            .collect())
    }

    #[allow(clippy::cast_precision_loss)]
    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset> {
        let meshes = (0..ctx.inputs().len())
            .map(|i| ctx.mesh(i))
            .collect::<Result<Vec<_>>>()?;
        let first = *meshes.first().ok_or_else(|| anyhow!("empty averaging window"))?;
        let key = ctx.metadata(0)?.index_request_key();
        let active = ctx.request().get(key).and_then(crate::value::Value::as_u64).unwrap_or(0);
        let template = meshes
            .iter()
            .find(|m| m.time_step == active)
            .copied()
            .unwrap_or(first);

        let mut out = CartesianMesh {
            time_step: template.time_step,
            time: template.time,
            x: template.x.clone(),
            y: template.y.clone(),
            arrays: first.arrays.keys().map(|k| (k.clone(), vec![0.0; first.nx() * first.ny()])).collect(),
        };
        for mesh in &meshes {
            ensure!(
                mesh.nx() == out.nx() && mesh.ny() == out.ny(),
                "step {} is {}x{}, expected {}x{}",
                mesh.time_step,
                mesh.nx(),
                mesh.ny(),
                out.nx(),
                out.ny()
            );
            for (name, acc) in &mut out.arrays {
                let values = mesh
                    .array(name)
                    .ok_or_else(|| anyhow!("step {} has no array '{name}'", mesh.time_step))?;
                ensure!(values.len() == acc.len(), "array '{name}' has the wrong length");
                acc.iter_mut().zip(values).for_each(|(a, v)| *a += v);
            }
        }
        let n = meshes.len() as f64;
        for acc in out.arrays.values_mut() {
            acc.iter_mut().for_each(|a| *a /= n);
        }
        Ok(Dataset::Mesh(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_are_clipped_to_the_domain() {
        let back = TemporalAverage::new(3, FilterType::Backward).unwrap();
        assert_eq!(back.window(0, 10), 0..=0);
        assert_eq!(back.window(5, 10), 3..=5);

        let fwd = TemporalAverage::new(3, FilterType::Forward).unwrap();
        assert_eq!(fwd.window(8, 10), 8..=9);

        let mid = TemporalAverage::new(5, FilterType::Centered).unwrap();
        assert_eq!(mid.window(1, 10), 0..=3);
        assert_eq!(mid.window(5, 10), 3..=7);
    }

    #[test]
    fn centered_filters_need_odd_widths() {
        assert!(matches!(
            TemporalAverage::new(4, FilterType::Centered),
            Err(ConfigError::CenteredWidth(4))
        ));
        assert!(matches!(TemporalAverage::new(0, FilterType::Forward), Err(ConfigError::FilterWidth)));
        assert!(TemporalAverage::new(4, FilterType::Backward).is_ok());
    }
}
