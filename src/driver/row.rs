//! Rows and result-set metadata.
//!
//! Cells stay in their native encoding until read; [`Row::get`] runs the
//! type mapper with the requested type as the conversion hint.

use crate::backend::Column;
use crate::error::{DriverError, DriverResult};
use crate::types::{FromValue, NativeType, NativeValue, Value, ValueKind, mapper};
use std::collections::HashMap;
use std::sync::Arc;

/// Description of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    name: String,
    ty: NativeType,
}

impl ColumnMetadata {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn native_type(&self) -> &NativeType {
        &self.ty
    }

    pub fn is_nullable(&self) -> bool {
        self.ty.is_optional()
    }
}

/// Column metadata of a result, shared by all of its rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMetadata {
    columns: Vec<ColumnMetadata>,
    name_to_index: HashMap<String, usize>,
}

impl RowMetadata {
    pub fn from_columns(columns: &[Column]) -> Self {
        let mut name_to_index = HashMap::with_capacity(columns.len());
        let mut meta = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            // First occurrence wins for duplicate names.
            name_to_index.entry(column.name.clone()).or_insert(i);
            meta.push(ColumnMetadata {
                name: column.name.clone(),
                ty: column.ty.clone(),
            });
        }
        Self {
            columns: meta,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnMetadata> {
        self.columns.get(index)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnMetadata> {
        self.index_of(name).and_then(|i| self.columns.get(i))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Something that selects a column: a position or a name.
pub trait ColumnIndex {
    fn resolve(&self, meta: &RowMetadata) -> DriverResult<usize>;
}

impl ColumnIndex for usize {
    fn resolve(&self, meta: &RowMetadata) -> DriverResult<usize> {
        if *self < meta.len() {
            Ok(*self)
        } else {
            Err(DriverError::invalid_state(format!(
                "column index {} out of range ({} columns)",
                self,
                meta.len()
            )))
        }
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, meta: &RowMetadata) -> DriverResult<usize> {
        meta.index_of(self)
            .ok_or_else(|| DriverError::invalid_state(format!("no column named '{}'", self)))
    }
}

/// One result row.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<NativeValue>,
    metadata: Arc<RowMetadata>,
}

impl Row {
    pub(crate) fn new(values: Vec<NativeValue>, metadata: Arc<RowMetadata>) -> Self {
        Self { values, metadata }
    }

    pub fn metadata(&self) -> &RowMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read a cell converted to `T`. NULL reads as `None` for `Option<T>`
    /// and fails for plain `T`.
    pub fn get<T: FromValue>(&self, index: impl ColumnIndex) -> DriverResult<T> {
        let value = self.convert(index, T::KIND)?;
        T::from_value(value)
    }

    /// Read a cell in its natural representation.
    pub fn get_value(&self, index: impl ColumnIndex) -> DriverResult<Value> {
        self.convert(index, ValueKind::Any)
    }

    /// Raw cell as delivered by the backend.
    pub fn native(&self, index: impl ColumnIndex) -> DriverResult<&NativeValue> {
        let i = index.resolve(&self.metadata)?;
        self.values
            .get(i)
            .ok_or_else(|| DriverError::invalid_state(format!("row has no cell {}", i)))
    }

    pub fn is_null(&self, index: impl ColumnIndex) -> DriverResult<bool> {
        Ok(self.native(index)?.is_absent())
    }

    fn convert(&self, index: impl ColumnIndex, hint: ValueKind) -> DriverResult<Value> {
        let native = self.native(index)?;
        mapper::from_backend(native, hint)
    }
}

/// Types that can be built from a whole row.
///
/// ```ignore
/// impl FromRow for User {
///     fn from_row(row: &Row) -> DriverResult<Self> {
///         Ok(User {
///             id: row.get("id")?,
///             name: row.get("name")?,
///         })
///     }
/// }
///
/// let users: Vec<User> = rows.collect_as().await?;
/// ```
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> DriverResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> DriverResult<Self> {
        Ok(row.clone())
    }
}
