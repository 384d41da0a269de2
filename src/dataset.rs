//! Datasets flowing between stages.
//!
//! Once produced, a dataset is shared read-only as a [`DatasetRef`]: the cache
//! hands the same `Arc` to every consumer of a given (stage, request).

use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared, immutable handle to a produced dataset.
pub type DatasetRef = Arc<Dataset>;

/// Output of one stage for one request.
#[derive(Clone, Debug, PartialEq)]
pub enum Dataset {
    Mesh(CartesianMesh),
    Table(Table),
    Artifact(Artifact),
    Empty,
}

impl Dataset {
    #[must_use]
    pub fn as_mesh(&self) -> Option<&CartesianMesh> {
        match self {
            Dataset::Mesh(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Dataset::Table(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_artifact(&self) -> Option<&Artifact> {
        match self {
            Dataset::Artifact(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Dataset::Mesh(_) => "mesh",
            Dataset::Table(_) => "table",
            Dataset::Artifact(_) => "artifact",
            Dataset::Empty => "empty",
        }
    }

    /// Time step this dataset declares, if any.
    #[must_use]
    pub fn time_step(&self) -> Option<u64> {
        match self {
            Dataset::Mesh(m) => Some(m.time_step),
            Dataset::Table(t) => t
                .attributes()
                .get(crate::request::keys::TIME_STEP)
                .and_then(crate::value::Value::as_u64),
            _ => None,
        }
    }
}

/// A 2D rectilinear grid at one instant, with named point arrays stored
/// row-major (`j * nx + i`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CartesianMesh {
    pub time_step: u64,
    pub time: f64,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    #[serde(default)]
    pub arrays: BTreeMap<String, Vec<f64>>,
}

impl CartesianMesh {
    #[must_use]
    pub fn nx(&self) -> usize {
        self.x.len()
    }

    #[must_use]
    pub fn ny(&self) -> usize {
        self.y.len()
    }

    #[must_use]
    pub fn array(&self, name: &str) -> Option<&[f64]> {
        self.arrays.get(name).map(Vec::as_slice)
    }

    /// Inclusive extent covering the whole grid. `None` for an empty grid.
    #[must_use]
    pub fn extent(&self) -> Option<[u64; 4]> {
        if self.x.is_empty() || self.y.is_empty() {
            return None;
        }
        Some([0, self.x.len() as u64 - 1, 0, self.y.len() as u64 - 1])
    }

    /// Keep only the named arrays.
    #[must_use]
    pub fn with_arrays(mut self, names: &[&str]) -> Self {
        self.arrays.retain(|k, _| names.contains(&k.as_str()));
        self
    }

    /// Restrict the grid to the inclusive index box `[i0, i1, j0, j1]`.
    /// Callers validate the extent against the whole extent first.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn subset(&self, extent: [u64; 4]) -> Self {
        let [i0, i1, j0, j1] = extent.map(|v| v as usize);
        let nx = self.nx();
        let arrays = self
            .arrays
            .iter()
            .map(|(name, values)| {
                let mut out = Vec::with_capacity((i1 - i0 + 1) * (j1 - j0 + 1));
                for j in j0..=j1 {
                    out.extend_from_slice(&values[j * nx + i0..=j * nx + i1]);
                }
                (name.clone(), out)
            })
            .collect();
        Self {
            time_step: self.time_step,
            time: self.time,
            x: self.x[i0..=i1].to_vec(),
            y: self.y[j0..=j1].to_vec(),
            arrays,
        }
    }
}

/// A dataset persisted by a sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub rows: usize,
    pub format: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subset_keeps_row_major_layout() {
        let mesh = CartesianMesh {
            time_step: 2,
            time: 0.5,
            x: vec![0.0, 1.0, 2.0],
            y: vec![10.0, 11.0],
            arrays: BTreeMap::from([("v".to_string(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])]),
        };
        let sub = mesh.subset([1, 2, 1, 1]);
        assert_eq!(sub.x, vec![1.0, 2.0]);
        assert_eq!(sub.y, vec![11.0]);
        assert_eq!(sub.array("v"), Some(&[4.0, 5.0][..]));
        assert_eq!(Dataset::Mesh(sub).time_step(), Some(2));
    }
}
