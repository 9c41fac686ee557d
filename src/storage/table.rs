//! Immutable tables of named, equal-length columns.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{ColflowError, Result};
use crate::storage::Column;
use crate::types::{DataType, Value};

/// Rows shown by the `Display` preview before eliding.
const DISPLAY_ROWS: usize = 20;

/// An ordered set of uniquely named columns sharing one row count.
///
/// Tables never change after construction. Operations that add, drop or
/// reorder columns return a new `Table` whose untouched columns are shared
/// with the original through `Arc`.
#[derive(Debug, Clone)]
pub struct Table {
    columns: IndexMap<String, Arc<Column>>,
    num_rows: usize,
}

impl Table {
    /// Creates a table from named columns.
    ///
    /// # Errors
    ///
    /// Returns `ShapeError` if column lengths differ and `SchemaError` if a
    /// name appears twice.
    pub fn new<S: Into<String>>(columns: Vec<(S, Column)>) -> Result<Self> {
        Self::from_arcs(
            columns
                .into_iter()
                .map(|(name, column)| (name.into(), Arc::new(column)))
                .collect(),
        )
    }

    /// Creates a table from already shared columns.
    ///
    /// # Errors
    ///
    /// Same as [`Table::new`].
    pub fn from_arcs(columns: Vec<(String, Arc<Column>)>) -> Result<Self> {
        let num_rows = columns.first().map_or(0, |(_, c)| c.len());
        Self::with_row_count(columns, num_rows)
    }

    /// Creates a table whose row count is fixed even with zero columns.
    pub(crate) fn with_row_count(
        columns: Vec<(String, Arc<Column>)>,
        num_rows: usize,
    ) -> Result<Self> {
        let mut map = IndexMap::with_capacity(columns.len());
        for (name, column) in columns {
            if column.len() != num_rows {
                return Err(ColflowError::ShapeError(format!(
                    "Column '{name}' has {} rows, expected {num_rows}",
                    column.len()
                )));
            }
            if map.contains_key(&name) {
                return Err(ColflowError::SchemaError(format!(
                    "Duplicate column name '{name}'"
                )));
            }
            map.insert(name, column);
        }
        Ok(Self {
            columns: map,
            num_rows,
        })
    }

    /// Creates a table with no columns and no rows.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            columns: IndexMap::new(),
            num_rows: 0,
        }
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns the column names in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    /// Returns `(name, kind)` pairs in column order.
    #[must_use]
    pub fn schema(&self) -> Vec<(String, DataType)> {
        self.columns
            .iter()
            .map(|(name, col)| (name.clone(), col.data_type()))
            .collect()
    }

    /// Returns true if a column with this name exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Looks up a column by name.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if the column does not exist.
    pub fn column(&self, name: &str) -> Result<&Arc<Column>> {
        self.columns
            .get(name)
            .ok_or_else(|| ColflowError::SchemaError(format!("Column '{name}' not found")))
    }

    /// Iterates over `(name, column)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Column>)> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c))
    }

    /// Gets a single cell.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` for an unknown column and `ShapeError` for a row
    /// past the end.
    pub fn value(&self, row: usize, name: &str) -> Result<Value> {
        self.column(name)?
            .get(row)
            .ok_or_else(|| self.row_out_of_range(row))
    }

    /// Returns whether a single cell is null.
    ///
    /// # Errors
    ///
    /// Same as [`Table::value`].
    pub fn is_null(&self, row: usize, name: &str) -> Result<bool> {
        let column = self.column(name)?;
        if row >= self.num_rows {
            return Err(self.row_out_of_range(row));
        }
        Ok(column.is_null(row))
    }

    fn row_out_of_range(&self, row: usize) -> ColflowError {
        ColflowError::ShapeError(format!(
            "Row {row} out of range for table with {} rows",
            self.num_rows
        ))
    }

    /// Returns a table holding only the named columns, in the given order.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if a name is missing or repeated.
    pub fn select(&self, names: &[&str]) -> Result<Table> {
        let columns = names
            .iter()
            .map(|name| Ok(((*name).to_string(), Arc::clone(self.column(name)?))))
            .collect::<Result<Vec<_>>>()?;
        Self::with_row_count(columns, self.num_rows)
    }

    /// Returns a table with `column` added, or replacing the same-named
    /// column in place.
    ///
    /// # Errors
    ///
    /// Returns `ShapeError` if the column length differs from the table's.
    pub fn with_column(&self, name: impl Into<String>, column: Arc<Column>) -> Result<Table> {
        let name = name.into();
        let adopt_rows = self.num_columns() == 0 && self.num_rows == 0;
        if !adopt_rows && column.len() != self.num_rows {
            return Err(ColflowError::ShapeError(format!(
                "Column '{name}' has {} rows, expected {}",
                column.len(),
                self.num_rows
            )));
        }
        let num_rows = if adopt_rows {
            column.len()
        } else {
            self.num_rows
        };
        let mut columns = self.columns.clone();
        columns.insert(name, column);
        Ok(Table { columns, num_rows })
    }

    /// Gathers rows by index, in order.
    #[must_use]
    pub fn take(&self, indices: &[usize]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|(n, c)| (n.clone(), Arc::new(c.take(indices))))
                .collect(),
            num_rows: indices.len(),
        }
    }

    /// Copies out up to `len` rows starting at `offset`.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Table {
        let start = offset.min(self.num_rows);
        let num_rows = len.min(self.num_rows - start);
        Table {
            columns: self
                .columns
                .iter()
                .map(|(n, c)| (n.clone(), Arc::new(c.slice(start, num_rows))))
                .collect(),
            num_rows,
        }
    }

    /// Stacks tables with identical schemas vertically, in order.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if the column names differ and `TypeMismatch` if
    /// kinds differ.
    pub fn concat(parts: &[Table]) -> Result<Table> {
        let Some(first) = parts.first() else {
            return Ok(Table::empty());
        };
        if parts.len() == 1 {
            return Ok(first.clone());
        }
        let names = first.column_names();
        for part in &parts[1..] {
            if part.column_names() != names {
                return Err(ColflowError::SchemaError(format!(
                    "Cannot concatenate tables with columns {:?} and {:?}",
                    names,
                    part.column_names()
                )));
            }
        }

        let num_rows = parts.iter().map(Table::num_rows).sum();
        let columns = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let pieces: Vec<&Column> = parts
                    .iter()
                    .filter_map(|p| p.columns.get_index(i).map(|(_, c)| c.as_ref()))
                    .collect();
                Ok(((*name).to_string(), Arc::new(Column::concat(&pieces)?)))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::with_row_count(columns, num_rows)
    }
}

// Equality is order-sensitive over (name, column) pairs
impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.num_rows == other.num_rows
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|((na, ca), (nb, cb))| na == nb && ca == cb)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.num_rows.min(DISPLAY_ROWS);
        let mut cells: Vec<Vec<String>> = Vec::with_capacity(self.columns.len());
        let mut widths = Vec::with_capacity(self.columns.len());
        for (name, column) in &self.columns {
            let rendered: Vec<String> = column.values().take(shown).map(|v| v.to_string()).collect();
            let width = rendered
                .iter()
                .map(String::len)
                .chain(std::iter::once(name.len()))
                .max()
                .unwrap_or(0);
            widths.push(width);
            cells.push(rendered);
        }

        let header: Vec<String> = self
            .columns
            .keys()
            .zip(&widths)
            .map(|(name, &w)| format!("{name:<w$}"))
            .collect();
        writeln!(f, "{}", header.join(" | "))?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", rule.join("-+-"))?;
        for row in 0..shown {
            let line: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(col, &w)| format!("{:<w$}", col[row]))
                .collect();
            writeln!(f, "{}", line.join(" | "))?;
        }
        if self.num_rows > shown {
            writeln!(f, "... {} more rows", self.num_rows - shown)?;
        }
        write!(f, "[{} rows x {} columns]", self.num_rows, self.columns.len())
    }
}
