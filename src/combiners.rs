//! Merge operators for map-reduce stages.
//!
//! A [`Combiner`] folds per-unit datasets into one. The reducer always calls
//! it the same way: `create` once, `merge` once per unit in ascending unit
//! order, then `finish`. `merge` must be associative, so a fixed order gives
//! the same answer however the units were scheduled.

use crate::dataset::{CartesianMesh, Dataset};
use crate::metadata::Metadata;
use crate::reduce::SkippedUnit;
use crate::table::Table;
use crate::value::Value;
use anyhow::{Context, Result, anyhow, bail, ensure};

/// Attribute holding the number of units a reduction skipped.
pub const SKIPPED_UNITS: &str = "skipped_units";
/// Attribute listing the requests (unit indices) a reduction skipped.
pub const SKIPPED_STEPS: &str = "skipped_steps";

pub trait Combiner: Send + Sync {
    fn name(&self) -> &str;

    /// Adjust the reducer's output metadata.
    ///
    /// # Errors
    /// Returns an error if the upstream metadata cannot be reduced by this
    /// combiner.
    fn output_metadata(&self, metadata: Metadata) -> Result<Metadata> {
        Ok(metadata)
    }

    /// Identity accumulator; also the result of an empty domain.
    ///
    /// # Errors
    /// Returns an error if the identity cannot be built from `metadata`.
    fn create(&self, metadata: &Metadata) -> Result<Dataset>;

    /// Fold one unit into the accumulator.
    ///
    /// # Errors
    /// Returns an error if `part` is incompatible with the accumulator.
    fn merge(&self, acc: Dataset, part: &Dataset) -> Result<Dataset>;

    /// Finalize the accumulator.
    ///
    /// # Errors
    /// Returns an error if the accumulator cannot be finalized.
    fn finish(&self, acc: Dataset, _skipped: &[SkippedUnit]) -> Result<Dataset> {
        Ok(acc)
    }
}

/* ===================== TableConcat ===================== */

/// Concatenate per-unit tables sharing the upstream's declared schema.
///
/// Zero-row tables are valid contributions. The result records the number of
/// skipped units in the [`SKIPPED_UNITS`] attribute.
#[derive(Clone, Copy, Debug, Default)]
pub struct TableConcat;

impl Combiner for TableConcat {
    fn name(&self) -> &str {
        "table_reduce"
    }

    fn output_metadata(&self, metadata: Metadata) -> Result<Metadata> {
        metadata
            .schema()
            .context("table reduction needs a declared table schema upstream")?;
        Ok(metadata)
    }

    fn create(&self, metadata: &Metadata) -> Result<Dataset> {
        Ok(Dataset::Table(Table::empty(metadata.schema()?)))
    }

    fn merge(&self, acc: Dataset, part: &Dataset) -> Result<Dataset> {
        let mut acc = match acc {
            Dataset::Table(table) => table,
            other => bail!("table reduction accumulator is a {}", other.kind()),
        };
        let part_table = part
            .as_table()
            .ok_or_else(|| anyhow!("cannot concatenate a {} into a table", part.kind()))?;
        acc.append(part_table)?;
        Ok(Dataset::Table(acc))
    }

    fn finish(&self, acc: Dataset, skipped: &[SkippedUnit]) -> Result<Dataset> {
        let mut table = match acc {
            Dataset::Table(table) => table,
            other => bail!("table reduction accumulator is a {}", other.kind()),
        };
        let steps: Vec<Value> = skipped
            .iter()
            .map(|s| s.request.time_step().map_or_else(|| Value::from(s.request.to_string()), Value::from))
            .collect();
        table.attributes_mut().set(SKIPPED_UNITS, skipped.len());
        table.attributes_mut().set(SKIPPED_STEPS, Value::List(steps));
        Ok(Dataset::Table(table))
    }
}

/* ===================== MeshSum ===================== */

/// Element-wise sum of every point array across units.
///
/// The first unit seeds the accumulator; later units must have the same grid
/// shape and arrays. An empty domain reduces to [`Dataset::Empty`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MeshSum;

impl MeshSum {
    fn accumulate(acc: &mut CartesianMesh, part: &CartesianMesh) -> Result<()> {
        ensure!(
            acc.nx() == part.nx() && acc.ny() == part.ny(),
            "grid {}x{} of step {} does not match accumulated grid {}x{}",
            part.nx(),
            part.ny(),
            part.time_step,
            acc.nx(),
            acc.ny()
        );
        for (name, values) in &mut acc.arrays {
            let other = part
                .array(name)
                .ok_or_else(|| anyhow!("step {} has no array '{name}'", part.time_step))?;
            for (a, b) in values.iter_mut().zip(other) {
                *a += b;
            }
        }
        Ok(())
    }
}

impl Combiner for MeshSum {
    fn name(&self) -> &str {
        "mesh_sum"
    }

    fn create(&self, _metadata: &Metadata) -> Result<Dataset> {
        Ok(Dataset::Empty)
    }

    fn merge(&self, acc: Dataset, part: &Dataset) -> Result<Dataset> {
        let part = part
            .as_mesh()
            .ok_or_else(|| anyhow!("cannot sum a {} into a mesh", part.kind()))?;
        match acc {
            Dataset::Empty => Ok(Dataset::Mesh(part.clone())),
            Dataset::Mesh(mut mesh) => {
                Self::accumulate(&mut mesh, part)?;
                Ok(Dataset::Mesh(mesh))
            }
            other => bail!("mesh sum accumulator is a {}", other.kind()),
        }
    }
}

/* ===================== FnCombiner ===================== */

/// Combiner built from closures.
pub struct FnCombiner<I, M> {
    name: String,
    identity: I,
    merge: M,
}

impl<I, M> FnCombiner<I, M>
where
    I: Fn(&Metadata) -> Result<Dataset> + Send + Sync,
    M: Fn(Dataset, &Dataset) -> Result<Dataset> + Send + Sync,
{
    pub fn new(name: impl Into<String>, identity: I, merge: M) -> Self {
        Self {
            name: name.into(),
            identity,
            merge,
        }
    }
}

impl<I, M> Combiner for FnCombiner<I, M>
where
    I: Fn(&Metadata) -> Result<Dataset> + Send + Sync,
    M: Fn(Dataset, &Dataset) -> Result<Dataset> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, metadata: &Metadata) -> Result<Dataset> {
        (self.identity)(metadata)
    }

    fn merge(&self, acc: Dataset, part: &Dataset) -> Result<Dataset> {
        (self.merge)(acc, part)
    }
}
