//! Threshold event detector.
//!
//! For each timestep, counts the grid cells whose value of one variable lies
//! in `[low, high]` and, if there are any, emits a single row describing them.
//! Steps without matching cells produce a zero-row table with the same schema,
//! which the table reducer treats as an empty contribution.

use crate::algorithm::{Algorithm, ExecuteContext, UpstreamRequest};
use crate::dataset::Dataset;
use crate::error::ConfigError;
use crate::metadata::{Metadata, keys};
use crate::request::{self, Request};
use crate::table::{ColumnType, Schema, Table};
use crate::value::Value;
use anyhow::{Result, anyhow, bail};

/// Per-timestep threshold detector over one mesh variable.
#[derive(Clone, Debug)]
pub struct ThresholdDetector {
    variable: String,
    low: f64,
    high: f64,
}

impl ThresholdDetector {
    /// # Errors
    /// Returns [`ConfigError::ThresholdRange`] if `low > high` or either
    /// bound is NaN.
    pub fn new(variable: impl Into<String>, low: f64, high: f64) -> Result<Self, ConfigError> {
        if low.is_nan() || high.is_nan() || low > high {
            return Err(ConfigError::ThresholdRange { low, high });
        }
        Ok(Self {
            variable: variable.into(),
            low,
            high,
        })
    }

    #[must_use]
    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Columns of every table this detector emits.
    #[must_use]
    pub fn schema() -> Schema {
        Schema::new()
            .with("time_step", ColumnType::Int)
            .with("time", ColumnType::Float)
            .with("cells", ColumnType::Int)
            .with("max_value", ColumnType::Float)
            .with("mean_x", ColumnType::Float)
            .with("mean_y", ColumnType::Float)
    }
}

impl Algorithm for ThresholdDetector {
    fn name(&self) -> &str {
        "threshold_detector"
    }

    fn output_metadata(&self, inputs: &[Metadata]) -> Result<Metadata> {
        let mut md = inputs.first().cloned().unwrap_or_default();
        if let Some(variables) = md.variables()
            && !variables.contains(&self.variable.as_str())
        {
            bail!("variable '{}' is not provided upstream", self.variable);
        }
        md.remove(keys::VARIABLES);
        md.remove(keys::WHOLE_EXTENT);
        md.set_schema(&Self::schema());
        Ok(md)
    }

    fn upstream_requests(&self, _inputs: &[Metadata], request: &Request) -> Result<Vec<UpstreamRequest>> {
        Ok(vec![UpstreamRequest::new(
            0,
            request.clone().with_arrays([self.variable.as_str()]),
        )])
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset> {
        let mesh = ctx.mesh(0)?;
        let values = mesh
            .array(&self.variable)
            .ok_or_else(|| anyhow!("mesh at step {} has no array '{}'", mesh.time_step, self.variable))?;
        let (nx, ny) = (mesh.nx(), mesh.ny());
        if values.len() != nx * ny {
            bail!(
                "array '{}' has {} values for a {nx}x{ny} grid",
                self.variable,
                values.len()
            );
        }

        let mut cells = 0u64;
        let mut max_value = f64::NEG_INFINITY;
        let (mut sum_x, mut sum_y) = (0.0, 0.0);
        for (j, y) in mesh.y.iter().enumerate() {
            for (i, x) in mesh.x.iter().enumerate() {
                let v = values[j * nx + i];
                if v >= self.low && v <= self.high {
                    cells += 1;
                    max_value = max_value.max(v);
                    sum_x += x;
                    sum_y += y;
                }
            }
        }

        let mut table = Table::empty(Self::schema());
        if cells > 0 {
            let n = cells as f64;
            table.append_row(vec![
                Value::Int(mesh.time_step as i64),
                Value::from(mesh.time),
                Value::Int(cells as i64),
                Value::from(max_value),
                Value::from(sum_x / n),
                Value::from(sum_y / n),
            ])?;
        }
        table.attributes_mut().set(request::keys::TIME_STEP, mesh.time_step);
        Ok(Dataset::Table(table))
    }
}
