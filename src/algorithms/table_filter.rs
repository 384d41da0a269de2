//! Row selection on tables.
//!
//! [`TableSelect`] keeps the rows of its input table for which a predicate
//! holds, or removes them when inverted. The predicate is either an
//! [`Expr`](crate::expr::Expr) over column names or a closure.
//!
//! ```
//! use geoflow::algorithms::TableSelect;
//!
//! let strong = TableSelect::expression("max_value >= 40 && cells > 10")?
//!     .remove_dependent_columns();
//! # Ok::<(), geoflow::error::ConfigError>(())
//! ```

use crate::algorithm::{Algorithm, ExecuteContext};
use crate::dataset::Dataset;
use crate::error::ConfigError;
use crate::expr::Expr;
use crate::metadata::Metadata;
use crate::table::{Schema, Table};
use anyhow::{Result, bail};
use std::sync::Arc;
use tracing::debug;

type RowPredicate = dyn Fn(&Table, usize) -> bool + Send + Sync;

#[derive(Clone)]
enum Predicate {
    Expr(Expr),
    Rows(Arc<RowPredicate>),
}

#[derive(Clone)]
pub struct TableSelect {
    predicate: Predicate,
    invert: bool,
    remove_dependent: bool,
}

impl TableSelect {
    /// Select rows where `source` evaluates to true.
    ///
    /// # Errors
    /// Returns [`ConfigError::Expression`] if `source` does not parse.
    pub fn expression(source: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            predicate: Predicate::Expr(Expr::parse(source)?),
            invert: false,
            remove_dependent: false,
        })
    }

    /// Select rows for which `f(table, row)` is true.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Table, usize) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Predicate::Rows(Arc::new(f)),
            invert: false,
            remove_dependent: false,
        }
    }

    /// Remove the matching rows instead of keeping them.
    #[must_use]
    pub fn invert(mut self) -> Self {
        self.invert = true;
        self
    }

    /// Drop the columns the expression reads from the output.
    #[must_use]
    pub fn remove_dependent_columns(mut self) -> Self {
        self.remove_dependent = true;
        self
    }

    fn dependent_columns(&self) -> Vec<&str> {
        match &self.predicate {
            Predicate::Expr(expr) if self.remove_dependent => expr.columns().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn output_schema(&self, schema: &Schema) -> Schema {
        let dropped = self.dependent_columns();
        schema
            .fields()
            .iter()
            .filter(|f| !dropped.contains(&f.name.as_str()))
            .fold(Schema::new(), |s, f| s.with(f.name.clone(), f.ty))
    }
}

impl Algorithm for TableSelect {
    fn name(&self) -> &str {
        "table_select"
    }

    fn output_metadata(&self, inputs: &[Metadata]) -> Result<Metadata> {
        let mut md = inputs.first().cloned().unwrap_or_default();
        let Ok(schema) = md.schema() else {
            return Ok(md);
        };
        if let Predicate::Expr(expr) = &self.predicate
            && let Some(missing) = expr.columns().into_iter().find(|c| schema.index_of(c).is_none())
        {
            bail!("expression {expr} reads column '{missing}', which the input table does not have");
        }
        md.set_schema(&self.output_schema(&schema));
        Ok(md)
    }

    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset> {
        let table = ctx.table(0)?;
        let mut keep = match &self.predicate {
            Predicate::Expr(expr) => expr.mask(table)?,
            Predicate::Rows(f) => (0..table.num_rows()).map(|row| f(table, row)).collect(),
        };
        if self.invert {
            keep.iter_mut().for_each(|k| *k = !*k);
        }
        let selected = table.select_rows(&keep);
        debug!(rows_in = table.num_rows(), rows_out = selected.num_rows(), "rows selected");
        Ok(Dataset::Table(selected.without_columns(&self.dependent_columns())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnType;

    #[test]
    fn dependent_columns_leave_the_declared_schema() {
        let select = TableSelect::expression("cells > 2").unwrap().remove_dependent_columns();
        let schema = Schema::new().with("time_step", ColumnType::Int).with("cells", ColumnType::Int);
        let md = select
            .output_metadata(&[Metadata::new().with(crate::metadata::keys::TABLE_SCHEMA, schema.to_value())])
            .unwrap();
        assert_eq!(md.schema().unwrap(), Schema::new().with("time_step", ColumnType::Int));
    }

    #[test]
    fn unknown_columns_fail_at_metadata_time() {
        let select = TableSelect::expression("depth > 2").unwrap();
        let mut md = Metadata::new();
        md.set_schema(&Schema::new().with("cells", ColumnType::Int));
        assert!(select.output_metadata(&[md]).is_err());
    }
}
