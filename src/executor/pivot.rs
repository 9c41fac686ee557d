//! Pivot (long to wide) and unpivot (wide to long) reshapes.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::{ColflowError, Result};
use crate::executor::{group_by, QueryExecutor};
use crate::expr::AggregateFunction;
use crate::storage::{Column, Table};
use crate::types::{DataType, Value};

/// Spreads the distinct values of `columns` into one column each.
///
/// Rows are grouped by (`index`, `columns`) and `values` is folded with
/// `agg`. The output has one row per distinct index value and one column per
/// distinct `columns` value, both in first-seen order. Derived columns are
/// named by the value's display form (`null` for a null value); a name
/// already taken gets the first free `_1`, `_2`, ... suffix. Cells with no
/// source rows are null.
///
/// # Errors
///
/// Returns `SchemaError` for a missing column or when a derived name equals
/// the index column, and `TypeMismatch` when `agg` rejects the value kind.
pub fn pivot(
    table: &Table,
    index: &str,
    columns: &str,
    values: &str,
    agg: AggregateFunction,
    executor: &QueryExecutor,
) -> Result<Table> {
    let index_column = table.column(index)?;
    let header_column = table.column(columns)?;
    let value_column = table.column(values)?;

    let grouped = group_by(table, &[index, columns], executor)?;
    let aggregated = grouped.aggregate_column(value_column, agg)?;

    let mut index_values: IndexSet<Value> = IndexSet::new();
    let mut index_rows = Vec::new();
    let mut header_values: IndexSet<Value> = IndexSet::new();
    // (output row, output column) of every group
    let mut cells = Vec::with_capacity(grouped.num_groups());
    for &row in grouped.first_rows() {
        let key = index_column.get(row).unwrap_or(Value::Null);
        let (out_row, inserted) = index_values.insert_full(key);
        if inserted {
            index_rows.push(row);
        }
        let (out_col, _) = header_values.insert_full(header_column.get(row).unwrap_or(Value::Null));
        cells.push((out_row, out_col));
    }

    let mut grid = vec![vec![Value::Null; index_values.len()]; header_values.len()];
    for (g, (out_row, out_col)) in cells.into_iter().enumerate() {
        grid[out_col][out_row] = aggregated.get(g).unwrap_or(Value::Null);
    }

    let mut output = Vec::with_capacity(header_values.len() + 1);
    output.push((index.to_string(), Arc::new(index_column.take(&index_rows))));
    let mut used: HashSet<String> = HashSet::from([index.to_string()]);
    for (header, cells) in header_values.iter().zip(grid) {
        let base = header.to_string();
        if base == index {
            return Err(ColflowError::SchemaError(format!(
                "Pivot column '{base}' collides with index column"
            )));
        }
        let name = unique_name(&base, &used);
        used.insert(name.clone());
        output.push((name, Arc::new(Column::from_values(aggregated.data_type(), cells)?)));
    }

    Table::with_row_count(output, index_values.len())
}

/// First of `base`, `base_1`, `base_2`, ... not already in `used`.
fn unique_name(base: &str, used: &HashSet<String>) -> String {
    if !used.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|name| !used.contains(name))
        .unwrap_or_else(|| base.to_string())
}

/// Stacks `value_columns` into (variable, value) pairs.
///
/// Emits one row per non-null value cell, row by row and, within a row, in
/// `value_columns` order. Index columns are repeated; the variable column
/// holds the source column name.
///
/// # Errors
///
/// Returns `SchemaError` for a missing or empty column list, or a name
/// clash in the output, and `TypeMismatch` when the value columns differ in
/// kind.
pub fn unpivot(
    table: &Table,
    index: &[&str],
    value_columns: &[&str],
    variable_name: &str,
    value_name: &str,
) -> Result<Table> {
    let Some(first) = value_columns.first() else {
        return Err(ColflowError::SchemaError(
            "Unpivot requires at least one value column".into(),
        ));
    };
    let kind: DataType = table.column(first)?.data_type();
    let sources = value_columns
        .iter()
        .map(|name| {
            let column = table.column(name)?;
            if column.data_type() == kind {
                Ok((*name, column.as_ref()))
            } else {
                Err(ColflowError::type_mismatch(
                    format!("{} for unpivot column '{name}'", kind.name()),
                    column.data_type().name(),
                ))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::new();
    let mut variables = Vec::new();
    let mut values = Vec::new();
    for row in 0..table.num_rows() {
        for (name, column) in &sources {
            if let Some(value) = column.get(row).filter(|v| !v.is_null()) {
                rows.push(row);
                variables.push(Some((*name).to_string()));
                values.push(value);
            }
        }
    }

    let mut output = index
        .iter()
        .map(|name| Ok(((*name).to_string(), Arc::new(table.column(name)?.take(&rows)))))
        .collect::<Result<Vec<_>>>()?;
    output.push((variable_name.to_string(), Arc::new(Column::String(variables))));
    output.push((value_name.to_string(), Arc::new(Column::from_values(kind, values)?)));

    Table::with_row_count(output, rows.len())
}
