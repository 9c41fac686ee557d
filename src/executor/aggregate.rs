//! Group-by aggregation.
//!
//! [`group_by`] assigns every row a group id in first-seen key order; the
//! [`GroupedTable`] it returns folds any number of value columns over those
//! groups. Row group ids and the numeric accumulators live in buffers
//! borrowed from the executor's [`MemoryPool`](crate::storage::MemoryPool).

use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::Arc;

use indexmap::IndexSet;
use tracing::debug;

use crate::error::{ColflowError, Result};
use crate::executor::{Evaluator, QueryExecutor};
use crate::expr::{AggregateFunction, Expr};
use crate::storage::{words_for_bits, Column, ScratchBuffer, Table};
use crate::types::Value;

/// A table partitioned into groups by key columns.
pub struct GroupedTable<'a> {
    table: &'a Table,
    executor: &'a QueryExecutor,
    keys: Vec<String>,
    /// Group id of every row.
    group_ids: ScratchBuffer<'a>,
    /// First row of every group, in group id order.
    first_rows: Vec<usize>,
}

/// Partitions `table` by the tuple of `keys`.
///
/// Groups are numbered in the order their first row appears. Null key cells
/// group together. With no keys every row falls into one global group, and
/// an empty table has no groups at all.
///
/// # Errors
///
/// Returns `SchemaError` if a key column does not exist.
pub fn group_by<'a>(
    table: &'a Table,
    keys: &[&str],
    executor: &'a QueryExecutor,
) -> Result<GroupedTable<'a>> {
    let key_columns = keys
        .iter()
        .map(|k| table.column(k).map(AsRef::as_ref))
        .collect::<Result<Vec<&Column>>>()?;

    let rows = table.num_rows();
    let mut group_ids = executor.memory_pool().acquire(rows);
    let mut first_rows = Vec::new();

    if key_columns.is_empty() {
        // ids are already zero
        if rows > 0 {
            first_rows.push(0);
        }
    } else {
        let mut groups: IndexSet<Vec<Value>> = IndexSet::new();
        for row in 0..rows {
            let key = key_columns
                .iter()
                .map(|c| c.get(row).unwrap_or(Value::Null))
                .collect();
            let (id, inserted) = groups.insert_full(key);
            if inserted {
                first_rows.push(row);
            }
            group_ids[row] = id as u64;
        }
    }

    debug!(rows, groups = first_rows.len(), "grouped table");

    Ok(GroupedTable {
        table,
        executor,
        keys: keys.iter().map(|k| (*k).to_string()).collect(),
        group_ids,
        first_rows,
    })
}

fn i64_word(value: i64) -> u64 {
    u64::from_ne_bytes(value.to_ne_bytes())
}

fn word_i64(word: u64) -> i64 {
    i64::from_ne_bytes(word.to_ne_bytes())
}

/// Borrows float cells, or widens integer cells.
#[allow(clippy::cast_precision_loss)]
fn float_cells(column: &Column, func: AggregateFunction) -> Result<Cow<'_, [Option<f64>]>> {
    match column {
        Column::Float(v) => Ok(Cow::Borrowed(v.as_slice())),
        Column::Integer(v) => Ok(Cow::Owned(
            v.iter().map(|cell| cell.map(|i| i as f64)).collect(),
        )),
        other => Err(ColflowError::type_mismatch(
            format!("numeric column for {func}"),
            other.data_type().name(),
        )),
    }
}

impl<'a> GroupedTable<'a> {
    /// Returns the number of groups.
    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.first_rows.len()
    }

    /// Returns the key column names.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Returns the first row of every group, in group id order.
    pub(crate) fn first_rows(&self) -> &[usize] {
        &self.first_rows
    }

    fn group_of(&self, row: usize) -> usize {
        self.group_ids[row] as usize
    }

    /// Aggregates named columns; output columns are named `{column}_{func}`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` for a missing column and `TypeMismatch` when a
    /// function does not accept the column's kind.
    pub fn aggregate(&self, requests: &[(&str, AggregateFunction)]) -> Result<Table> {
        let columns = requests
            .iter()
            .map(|(name, func)| {
                let column = self.aggregate_column(self.table.column(name)?, *func)?;
                Ok((format!("{name}_{}", func.name()), Arc::new(column)))
            })
            .collect::<Result<Vec<_>>>()?;
        self.finish(columns)
    }

    /// Aggregates `(output name, aggregate expression)` pairs.
    ///
    /// The input of each aggregate is evaluated against the whole table
    /// before it is folded per group.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` if an expression is not an aggregate,
    /// plus any error raised while evaluating or aggregating its input.
    pub fn agg_exprs(&self, aggregates: &[(String, Expr)]) -> Result<Table> {
        let columns = aggregates
            .iter()
            .map(|(name, expr)| {
                let Expr::Aggregate { func, input } = expr else {
                    return Err(ColflowError::UnsupportedOperation(format!(
                        "'{expr}' is not an aggregate expression"
                    )));
                };
                let values = Evaluator::evaluate(input, self.table)?;
                Ok((name.clone(), Arc::new(self.aggregate_column(&values, *func)?)))
            })
            .collect::<Result<Vec<_>>>()?;
        self.finish(columns)
    }

    /// Prepends one row of key values per group.
    fn finish(&self, aggregated: Vec<(String, Arc<Column>)>) -> Result<Table> {
        let mut columns = Vec::with_capacity(self.keys.len() + aggregated.len());
        for key in &self.keys {
            let column = self.table.column(key)?.take(&self.first_rows);
            columns.push((key.clone(), Arc::new(column)));
        }
        columns.extend(aggregated);
        Table::with_row_count(columns, self.num_groups())
    }

    /// Folds `column` with `func`, yielding one cell per group.
    pub(crate) fn aggregate_column(&self, column: &Column, func: AggregateFunction) -> Result<Column> {
        if column.len() != self.table.num_rows() {
            return Err(ColflowError::ShapeError(format!(
                "aggregate input has {} rows, table has {}",
                column.len(),
                self.table.num_rows()
            )));
        }

        match func {
            AggregateFunction::Count => {
                let counts = self.counts(column);
                Ok(Column::Integer(
                    (0..self.num_groups())
                        .map(|g| Some(word_i64(counts[g])))
                        .collect(),
                ))
            }
            AggregateFunction::Sum => match column {
                Column::Integer(values) => self.sum_integers(values),
                _ => {
                    let values = float_cells(column, func)?;
                    let (counts, sums) = self.float_sums(&values);
                    Ok(Column::Float(
                        (0..self.num_groups())
                            .map(|g| (counts[g] > 0).then(|| f64::from_bits(sums[g])))
                            .collect(),
                    ))
                }
            },
            AggregateFunction::Mean => {
                let values = float_cells(column, func)?;
                let (counts, sums) = self.float_sums(&values);
                Ok(Column::Float(
                    (0..self.num_groups())
                        .map(|g| mean(counts[g], f64::from_bits(sums[g])))
                        .collect(),
                ))
            }
            AggregateFunction::Std => {
                let values = float_cells(column, func)?;
                Ok(Column::Float(self.sample_std(&values)))
            }
            AggregateFunction::Median => {
                let values = float_cells(column, func)?;
                Ok(Column::Float(self.medians(&values)))
            }
            AggregateFunction::Min | AggregateFunction::Max => {
                let keep = if func == AggregateFunction::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                Ok(match column {
                    Column::Integer(v) => Column::Integer(self.extreme(v, keep)),
                    Column::Float(v) => Column::Float(self.extreme_float(v, keep)),
                    Column::String(v) => Column::String(self.extreme(v, keep)),
                    Column::Boolean(v) => Column::Boolean(self.extreme(v, keep)),
                })
            }
        }
    }

    /// Non-null cells per group.
    fn counts(&self, column: &Column) -> ScratchBuffer<'a> {
        let mut counts = self.executor.memory_pool().acquire(self.num_groups());
        for row in 0..column.len() {
            if !column.is_null(row) {
                counts[self.group_of(row)] += 1;
            }
        }
        counts
    }

    fn sum_integers(&self, values: &[Option<i64>]) -> Result<Column> {
        let pool = self.executor.memory_pool();
        let groups = self.num_groups();
        let mut sums = pool.acquire(groups);
        let mut seen = pool.acquire(words_for_bits(groups));

        for (row, value) in values.iter().enumerate() {
            let Some(value) = value else { continue };
            let g = self.group_of(row);
            let total = word_i64(sums[g]).checked_add(*value).ok_or_else(|| {
                ColflowError::ArithmeticOverflow(format!("integer sum of group {g}"))
            })?;
            sums[g] = i64_word(total);
            seen.set_bit(g);
        }

        Ok(Column::Integer(
            (0..groups)
                .map(|g| seen.bit(g).then(|| word_i64(sums[g])))
                .collect(),
        ))
    }

    /// Per-group (count, sum) with sums stored as f64 bits.
    fn float_sums(&self, values: &[Option<f64>]) -> (ScratchBuffer<'a>, ScratchBuffer<'a>) {
        let pool = self.executor.memory_pool();
        let mut counts = pool.acquire(self.num_groups());
        let mut sums = pool.acquire(self.num_groups());
        for (row, value) in values.iter().enumerate() {
            let Some(value) = value else { continue };
            let g = self.group_of(row);
            counts[g] += 1;
            sums[g] = (f64::from_bits(sums[g]) + value).to_bits();
        }
        (counts, sums)
    }

    /// Sample standard deviation (n - 1), null below two values.
    #[allow(clippy::cast_precision_loss)]
    fn sample_std(&self, values: &[Option<f64>]) -> Vec<Option<f64>> {
        let (counts, sums) = self.float_sums(values);
        let means: Vec<Option<f64>> = (0..self.num_groups())
            .map(|g| mean(counts[g], f64::from_bits(sums[g])))
            .collect();

        let mut squares = self.executor.memory_pool().acquire(self.num_groups());
        for (row, value) in values.iter().enumerate() {
            let g = self.group_of(row);
            if let (Some(value), Some(m)) = (value, means[g]) {
                squares[g] = (f64::from_bits(squares[g]) + (value - m).powi(2)).to_bits();
            }
        }

        (0..self.num_groups())
            .map(|g| {
                (counts[g] >= 2)
                    .then(|| (f64::from_bits(squares[g]) / (counts[g] - 1) as f64).sqrt())
            })
            .collect()
    }

    fn medians(&self, values: &[Option<f64>]) -> Vec<Option<f64>> {
        let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); self.num_groups()];
        for (row, value) in values.iter().enumerate() {
            if let Some(value) = value {
                buckets[self.group_of(row)].push(*value);
            }
        }
        buckets
            .into_iter()
            .map(|mut bucket| {
                if bucket.is_empty() {
                    return None;
                }
                bucket.sort_by(f64::total_cmp);
                let mid = bucket.len() / 2;
                Some(if bucket.len() % 2 == 0 {
                    (bucket[mid - 1] + bucket[mid]) / 2.0
                } else {
                    bucket[mid]
                })
            })
            .collect()
    }

    /// Keeps the cell that orders `keep` against every other cell of its group.
    fn extreme<T: Ord + Clone>(&self, values: &[Option<T>], keep: Ordering) -> Vec<Option<T>> {
        let mut best: Vec<Option<&T>> = vec![None; self.num_groups()];
        for (row, value) in values.iter().enumerate() {
            let Some(value) = value else { continue };
            let slot = &mut best[self.group_of(row)];
            if slot.map_or(true, |current| value.cmp(current) == keep) {
                *slot = Some(value);
            }
        }
        best.into_iter().map(|b| b.cloned()).collect()
    }

    /// Float min/max; NaN cells lose to any number.
    fn extreme_float(&self, values: &[Option<f64>], keep: Ordering) -> Vec<Option<f64>> {
        let mut best: Vec<Option<f64>> = vec![None; self.num_groups()];
        for (row, value) in values.iter().enumerate() {
            let Some(value) = *value else { continue };
            let slot = &mut best[self.group_of(row)];
            *slot = Some(match *slot {
                None => value,
                Some(current) if keep == Ordering::Less => current.min(value),
                Some(current) => current.max(value),
            });
        }
        best
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(count: u64, sum: f64) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}
