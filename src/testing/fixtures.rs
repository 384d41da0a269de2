//! Synthetic datasets.

use crate::dataset::CartesianMesh;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A `nx` by `ny` mesh on a unit-spaced grid for step `step`.
///
/// `prw` is `step + i + j` at cell `(i, j)` and `ivt` is ten times that, so
/// the maximum of either array grows with the step.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn synthetic_mesh(step: u64, nx: usize, ny: usize) -> CartesianMesh {
    let x: Vec<f64> = (0..nx).map(|i| i as f64).collect();
    let y: Vec<f64> = (0..ny).map(|j| 10.0 + j as f64).collect();
    let prw: Vec<f64> = (0..ny)
        .flat_map(|j| (0..nx).map(move |i| (step as usize + i + j) as f64))
        .collect();
    let ivt = prw.iter().map(|v| v * 10.0).collect();
    CartesianMesh {
        time_step: step,
        time: step as f64 * 0.25,
        x,
        y,
        arrays: BTreeMap::from([("prw".to_string(), prw), ("ivt".to_string(), ivt)]),
    }
}

/// Write `meshes` as JSON lines, `per_file` steps per file, into `dir` with
/// names `<prefix>_000.jsonl`, `<prefix>_001.jsonl`, ...
///
/// Returns the `files_regex` matching the written files.
///
/// # Errors
/// Returns an error if a file cannot be written.
pub fn write_mesh_dataset(dir: &Path, prefix: &str, per_file: usize, meshes: &[CartesianMesh]) -> Result<String> {
    for (n, chunk) in meshes.chunks(per_file.max(1)).enumerate() {
        let path = dir.join(format!("{prefix}_{n:03}.jsonl"));
        let mut out = BufWriter::new(File::create(&path).with_context(|| format!("create {}", path.display()))?);
        for mesh in chunk {
            serde_json::to_writer(&mut out, mesh)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }
    Ok(dir.join(format!(r"{prefix}_\d+\.jsonl")).display().to_string())
}
