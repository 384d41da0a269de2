//! Assertions over tables and datasets.

use crate::dataset::Dataset;
use crate::table::Table;
use crate::value::Value;

/// Assert that two tables have the same schema and the same rows in the same
/// order. Attributes are not compared.
///
/// # Panics
///
/// Panics with the first difference found.
pub fn assert_tables_equal(actual: &Table, expected: &Table) {
    assert_eq!(
        actual.schema(),
        expected.schema(),
        "Schema mismatch:\n  Expected: {}\n  Actual: {}",
        expected.schema(),
        actual.schema()
    );
    assert_eq!(
        actual.num_rows(),
        expected.num_rows(),
        "Row count mismatch:\n  Expected: {}\n  Actual: {}",
        expected.num_rows(),
        actual.num_rows()
    );
    for (i, (a, e)) in actual.rows().zip(expected.rows()).enumerate() {
        assert_eq!(a, e, "Row {i} differs:\n  Expected: {e:?}\n  Actual: {a:?}");
    }
}

/// Values of column `name`, top to bottom.
///
/// # Panics
///
/// Panics if the column does not exist.
#[must_use]
pub fn column_values(table: &Table, name: &str) -> Vec<Value> {
    let column = table
        .column(name)
        .unwrap_or_else(|| panic!("no column '{name}' in {}", table.schema()));
    (0..column.len()).filter_map(|i| column.get(i)).collect()
}

/// The table inside `dataset`.
///
/// # Panics
///
/// Panics if the dataset is not a table.
#[must_use]
pub fn expect_table(dataset: &Dataset) -> &Table {
    dataset
        .as_table()
        .unwrap_or_else(|| panic!("expected a table, got a {}", dataset.kind()))
}
