//! Column-oriented tables with a declared schema.
//!
//! Detectors emit one [`Table`] per unit and the reducer concatenates them,
//! so merge rules are strict: two tables combine only when their schemas are
//! identical, and a zero-row table is a valid contribution like any other.

use crate::error::TableError;
use crate::metadata::Metadata;
use crate::value::Value;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Cell type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Str,
}

impl ColumnType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Str => "str",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "int" => Some(ColumnType::Int),
            "float" => Some(ColumnType::Float),
            "str" => Some(ColumnType::Str),
            _ => None,
        }
    }
}

/// One named, typed column declaration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: ColumnType,
}

/// Ordered list of fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field (builder style).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.fields.push(Field { name: name.into(), ty });
        self
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Encode as a metadata value: a list of `[name, type]` pairs.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::List(
            self.fields
                .iter()
                .map(|f| Value::List(vec![Value::from(f.name.as_str()), Value::from(f.ty.name())]))
                .collect(),
        )
    }

    /// Decode the representation produced by [`Schema::to_value`].
    ///
    /// # Errors
    /// Returns [`TableError::MalformedSchema`] if the value has another shape.
    pub fn from_value(value: &Value) -> Result<Self, TableError> {
        let malformed = || TableError::MalformedSchema(value.to_string());
        let mut schema = Schema::new();
        for entry in value.as_list().ok_or_else(malformed)? {
            let pair = entry.as_list().ok_or_else(malformed)?;
            let [name, ty] = pair else {
                return Err(malformed());
            };
            let name = name.as_str().ok_or_else(malformed)?;
            let ty = ty.as_str().and_then(ColumnType::parse).ok_or_else(malformed)?;
            schema = schema.with(name, ty);
        }
        Ok(schema)
    }
}

impl Display for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field.name, field.ty.name())?;
        }
        write!(f, ")")
    }
}

/// Typed column storage.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Str(Vec<String>),
}

impl Column {
    #[must_use]
    pub fn empty(ty: ColumnType) -> Self {
        match ty {
            ColumnType::Int => Column::Int(Vec::new()),
            ColumnType::Float => Column::Float(Vec::new()),
            ColumnType::Str => Column::Str(Vec::new()),
        }
    }

    #[must_use]
    pub fn ty(&self) -> ColumnType {
        match self {
            Column::Int(_) => ColumnType::Int,
            Column::Float(_) => ColumnType::Float,
            Column::Str(_) => ColumnType::Str,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell `i` as a [`Value`].
    #[must_use]
    pub fn get(&self, i: usize) -> Option<Value> {
        match self {
            Column::Int(v) => v.get(i).map(|x| Value::Int(*x)),
            Column::Float(v) => v.get(i).map(|x| Value::Float(OrderedFloat(*x))),
            Column::Str(v) => v.get(i).map(|x| Value::Str(x.clone())),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn push(&mut self, column: &str, value: Value) -> Result<(), TableError> {
        match (self, value) {
            (Column::Int(v), Value::Int(x)) => v.push(x),
            (Column::Float(v), Value::Float(x)) => v.push(x.0),
            (Column::Float(v), Value::Int(x)) => v.push(x as f64),
            (Column::Str(v), Value::Str(x)) => v.push(x),
            (col, other) => {
                return Err(TableError::TypeMismatch {
                    column: column.to_string(),
                    expected: col.ty(),
                    found: other.type_name(),
                });
            }
        }
        Ok(())
    }

    fn extend_from(&mut self, other: &Column) {
        match (self, other) {
            (Column::Int(a), Column::Int(b)) => a.extend_from_slice(b),
            (Column::Float(a), Column::Float(b)) => a.extend_from_slice(b),
            (Column::Str(a), Column::Str(b)) => a.extend_from_slice(b),
            // schemas are compared before any extend
            _ => {}
        }
    }

    fn select(&self, keep: &[bool]) -> Column {
        fn pick<T: Clone>(v: &[T], keep: &[bool]) -> Vec<T> {
            v.iter()
                .zip(keep)
                .filter(|(_, k)| **k)
                .map(|(x, _)| x.clone())
                .collect()
        }
        match self {
            Column::Int(v) => Column::Int(pick(v, keep)),
            Column::Float(v) => Column::Float(pick(v, keep)),
            Column::Str(v) => Column::Str(pick(v, keep)),
        }
    }
}

/// A table: declared schema, one column per field, and dataset attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    schema: Schema,
    columns: Vec<Column>,
    attributes: Metadata,
}

impl Table {
    /// A zero-row table with the given schema.
    #[must_use]
    pub fn empty(schema: Schema) -> Self {
        let columns = schema.fields().iter().map(|f| Column::empty(f.ty)).collect();
        Self {
            schema,
            columns,
            attributes: Metadata::new(),
        }
    }

    /// Build a table from rows.
    ///
    /// # Errors
    /// Returns a [`TableError`] if a row has the wrong length or a cell has
    /// the wrong type.
    pub fn from_rows<I>(schema: Schema, rows: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let mut table = Self::empty(schema);
        for row in rows {
            table.append_row(row)?;
        }
        Ok(table)
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.schema.index_of(name).map(|i| &self.columns[i])
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Cell at (`row`, `name`).
    #[must_use]
    pub fn value(&self, row: usize, name: &str) -> Option<Value> {
        self.column(name)?.get(row)
    }

    /// Row `i` as values in schema order.
    #[must_use]
    pub fn row(&self, i: usize) -> Option<Vec<Value>> {
        self.columns.iter().map(|c| c.get(i)).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.num_rows()).filter_map(|i| self.row(i))
    }

    #[must_use]
    pub fn attributes(&self) -> &Metadata {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Metadata {
        &mut self.attributes
    }

    /// Append one row in schema order. Integers are accepted into float
    /// columns.
    ///
    /// # Errors
    /// Returns a [`TableError`] on a length or type mismatch; the table is
    /// left unchanged.
    pub fn append_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowLength {
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        for (field, value) in self.schema.fields().iter().zip(&row) {
            let ok = matches!(
                (field.ty, value),
                (ColumnType::Int, Value::Int(_))
                    | (ColumnType::Float, Value::Float(_) | Value::Int(_))
                    | (ColumnType::Str, Value::Str(_))
            );
            if !ok {
                return Err(TableError::TypeMismatch {
                    column: field.name.clone(),
                    expected: field.ty,
                    found: value.type_name(),
                });
            }
        }
        for ((field, column), value) in self.schema.fields().iter().zip(&mut self.columns).zip(row) {
            column.push(&field.name, value)?;
        }
        Ok(())
    }

    /// Append all rows of `other`, which must have an identical schema.
    ///
    /// # Errors
    /// Returns [`TableError::SchemaMismatch`] when the schemas differ.
    pub fn append(&mut self, other: &Table) -> Result<(), TableError> {
        if self.schema != other.schema {
            return Err(TableError::SchemaMismatch {
                expected: self.schema.clone(),
                found: other.schema.clone(),
            });
        }
        for (mine, theirs) in self.columns.iter_mut().zip(&other.columns) {
            mine.extend_from(theirs);
        }
        Ok(())
    }

    /// Add a column at the end of the schema.
    ///
    /// # Errors
    /// Returns a [`TableError`] if the name is taken or the length differs
    /// from the current row count.
    pub fn add_column(&mut self, name: impl Into<String>, column: Column) -> Result<(), TableError> {
        let name = name.into();
        if self.schema.index_of(&name).is_some() {
            return Err(TableError::DuplicateColumn(name));
        }
        if !self.columns.is_empty() && column.len() != self.num_rows() {
            return Err(TableError::ColumnLength {
                column: name,
                expected: self.num_rows(),
                found: column.len(),
            });
        }
        self.schema = std::mem::take(&mut self.schema).with(name, column.ty());
        self.columns.push(column);
        Ok(())
    }

    /// A copy without the named columns. Unknown names are ignored.
    #[must_use]
    pub fn without_columns(&self, names: &[&str]) -> Table {
        let mut schema = Schema::new();
        let mut columns = Vec::new();
        for (field, column) in self.schema.fields().iter().zip(&self.columns) {
            if !names.contains(&field.name.as_str()) {
                schema = schema.with(field.name.clone(), field.ty);
                columns.push(column.clone());
            }
        }
        Table {
            schema,
            columns,
            attributes: self.attributes.clone(),
        }
    }

    /// A copy holding only the rows whose mask entry is `true`.
    ///
    /// # Panics
    /// Panics if `keep.len()` differs from the row count.
    #[must_use]
    pub fn select_rows(&self, keep: &[bool]) -> Table {
        assert_eq!(keep.len(), self.num_rows(), "row mask length must match the table");
        Table {
            schema: self.schema.clone(),
            columns: self.columns.iter().map(|c| c.select(keep)).collect(),
            attributes: self.attributes.clone(),
        }
    }
}
