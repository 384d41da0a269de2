//! Upstream-declared descriptions of what a stage can produce.
//!
//! Metadata is computed once per topology change, without touching bulk data,
//! and is what the request pass validates requests against. The well-known
//! keys in [`keys`] follow the conventions of gridded climate datasets; any
//! other key may be set by custom algorithms.

use crate::error::TableError;
use crate::request;
use crate::table::Schema;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known metadata keys.
pub mod keys {
    pub const NUMBER_OF_TIME_STEPS: &str = "number_of_time_steps";
    pub const VARIABLES: &str = "variables";
    pub const COORDINATES_X: &str = "coordinates.x";
    pub const COORDINATES_Y: &str = "coordinates.y";
    pub const COORDINATES_T: &str = "coordinates.t";
    pub const WHOLE_EXTENT: &str = "whole_extent";
    pub const FILES: &str = "files";
    pub const STEP_COUNT: &str = "step_count";
    /// Name of the key that holds the size of the iteration domain.
    pub const INDEX_INITIALIZER: &str = "index_initializer_key";
    /// Name of the request key that selects one unit of the domain.
    pub const INDEX_REQUEST: &str = "index_request_key";
    /// Declared schema of tabular output.
    pub const TABLE_SCHEMA: &str = "table_schema";
}

/// Key/value description of a stage's output.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, Value>);

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`Metadata::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn number_of_time_steps(&self) -> Option<u64> {
        self.get(keys::NUMBER_OF_TIME_STEPS).and_then(Value::as_u64)
    }

    #[must_use]
    pub fn variables(&self) -> Option<Vec<&str>> {
        self.get(keys::VARIABLES).and_then(Value::as_str_list)
    }

    #[must_use]
    pub fn files(&self) -> Option<Vec<&str>> {
        self.get(keys::FILES).and_then(Value::as_str_list)
    }

    /// Inclusive index-space bounds `[i0, i1, j0, j1]`.
    #[must_use]
    pub fn whole_extent(&self) -> Option<[u64; 4]> {
        let list = self.get(keys::WHOLE_EXTENT)?.as_list()?;
        let parsed: Option<Vec<u64>> = list.iter().map(Value::as_u64).collect();
        parsed?.try_into().ok()
    }

    /// Name of the key holding the domain size.
    #[must_use]
    pub fn index_initializer_key(&self) -> &str {
        self.get(keys::INDEX_INITIALIZER)
            .and_then(Value::as_str)
            .unwrap_or(keys::NUMBER_OF_TIME_STEPS)
    }

    /// Name of the request key selecting one unit.
    #[must_use]
    pub fn index_request_key(&self) -> &str {
        self.get(keys::INDEX_REQUEST)
            .and_then(Value::as_str)
            .unwrap_or(request::keys::TIME_STEP)
    }

    /// Number of units in the iteration domain, if this stage declares one.
    #[must_use]
    pub fn domain_size(&self) -> Option<u64> {
        self.get(self.index_initializer_key()).and_then(Value::as_u64)
    }

    pub fn set_schema(&mut self, schema: &Schema) {
        self.set(keys::TABLE_SCHEMA, schema.to_value());
    }

    /// Declared table schema.
    ///
    /// # Errors
    /// Returns [`TableError::MissingSchema`] if no schema was declared, or
    /// [`TableError::MalformedSchema`] if the stored value is not a schema.
    pub fn schema(&self) -> Result<Schema, TableError> {
        let value = self.get(keys::TABLE_SCHEMA).ok_or(TableError::MissingSchema)?;
        Schema::from_value(value)
    }
}
