//! Hash join operator.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::error::{ColflowError, Result};
use crate::executor::QueryExecutor;
use crate::planner::JoinType;
use crate::storage::{words_for_bits, Column, Table};
use crate::types::Value;

/// Composite key of one row. Rows with a null or NaN key cell have none.
type JoinKey = Vec<Value>;

/// Positions of the rows in the build side, per key, in table order.
type JoinIndex = HashMap<JoinKey, Vec<usize>>;

/// (left row, right row) of one output row; `None` pads with nulls.
type RowPair = (Option<usize>, Option<usize>);

/// Suffix appended to right columns whose name is taken by a left column.
const RIGHT_SUFFIX: &str = "_right";

/// Hash join operator.
///
/// The right input is the build side and the left input probes it, so
/// output rows follow left order, then right order within one left row.
/// Right-only rows of `Right` and `Outer` joins come last, in right order.
///
/// Output columns are the left columns followed by the right non-key
/// columns. Key columns appear once; for right-only rows they carry the
/// right key values.
#[derive(Debug, Clone)]
pub struct HashJoinOperator {
    left_keys: Vec<String>,
    right_keys: Vec<String>,
    join_type: JoinType,
}

/// Joins two tables on equal key columns.
///
/// # Errors
///
/// See [`HashJoinOperator::execute`].
pub fn join(
    left: &Table,
    right: &Table,
    left_keys: &[&str],
    right_keys: &[&str],
    join_type: JoinType,
    executor: &QueryExecutor,
) -> Result<Table> {
    HashJoinOperator::new(
        left_keys.iter().map(|k| (*k).to_string()).collect(),
        right_keys.iter().map(|k| (*k).to_string()).collect(),
        join_type,
    )
    .execute(left, right, executor)
}

/// Extracts the key of `row`, or None if any key cell is null or NaN.
fn row_key(columns: &[&Column], row: usize) -> Option<JoinKey> {
    columns
        .iter()
        .map(|column| match column.get(row)? {
            Value::Null => None,
            Value::Float(f) if f.is_nan() => None,
            value => Some(value),
        })
        .collect()
}

fn build_index(columns: &[&Column], rows: Range<usize>) -> JoinIndex {
    let mut index = JoinIndex::new();
    for row in rows {
        if let Some(key) = row_key(columns, row) {
            index.entry(key).or_default().push(row);
        }
    }
    index
}

/// Gathers a key column, taking right key cells for right-only rows.
fn gather_key(left: &Column, right: &Column, pairs: &[RowPair]) -> Result<Column> {
    macro_rules! gather {
        ($variant:ident, $l:expr, $r:expr) => {
            Column::$variant(
                pairs
                    .iter()
                    .map(|pair| match *pair {
                        (Some(i), _) => $l[i].clone(),
                        (None, Some(j)) => $r[j].clone(),
                        (None, None) => None,
                    })
                    .collect(),
            )
        };
    }

    Ok(match (left, right) {
        (Column::Integer(l), Column::Integer(r)) => gather!(Integer, l, r),
        (Column::Float(l), Column::Float(r)) => gather!(Float, l, r),
        (Column::String(l), Column::String(r)) => gather!(String, l, r),
        (Column::Boolean(l), Column::Boolean(r)) => gather!(Boolean, l, r),
        _ => {
            return Err(ColflowError::type_mismatch(
                left.data_type().name(),
                right.data_type().name(),
            ))
        }
    })
}

impl HashJoinOperator {
    /// Creates a join on `left_keys[i] == right_keys[i]` for every `i`.
    #[must_use]
    pub fn new(left_keys: Vec<String>, right_keys: Vec<String>, join_type: JoinType) -> Self {
        HashJoinOperator {
            left_keys,
            right_keys,
            join_type,
        }
    }

    /// Resolves the key columns of both sides and checks they pair up.
    fn key_columns<'a>(
        &self,
        left: &'a Table,
        right: &'a Table,
    ) -> Result<(Vec<&'a Column>, Vec<&'a Column>)> {
        if self.left_keys.len() != self.right_keys.len() {
            return Err(ColflowError::SchemaError(format!(
                "Join has {} left keys but {} right keys",
                self.left_keys.len(),
                self.right_keys.len()
            )));
        }
        if self.left_keys.is_empty() {
            return Err(ColflowError::SchemaError(
                "Join requires at least one key column".into(),
            ));
        }

        let mut left_cols = Vec::with_capacity(self.left_keys.len());
        let mut right_cols = Vec::with_capacity(self.right_keys.len());
        for (lk, rk) in self.left_keys.iter().zip(&self.right_keys) {
            let l = left.column(lk)?;
            let r = right.column(rk)?;
            if l.data_type() != r.data_type() {
                return Err(ColflowError::type_mismatch(
                    format!("{} for key '{rk}'", l.data_type().name()),
                    r.data_type().name(),
                ));
            }
            left_cols.push(l.as_ref());
            right_cols.push(r.as_ref());
        }
        Ok((left_cols, right_cols))
    }

    /// Indexes the build side, in parallel shards when it is large.
    fn build(&self, right_cols: &[&Column], rows: usize, executor: &QueryExecutor) -> JoinIndex {
        let threads = executor.num_threads();
        if rows < executor.config().parallel_threshold || threads < 2 {
            return build_index(right_cols, 0..rows);
        }

        let shard_rows = rows.div_ceil(threads);
        let shards: Vec<JoinIndex> = executor.install(|| {
            (0..threads)
                .into_par_iter()
                .map(|s| build_index(right_cols, s * shard_rows..((s + 1) * shard_rows).min(rows)))
                .collect()
        });

        // Shards cover ascending row ranges, so appending in shard order
        // keeps every position list in table order
        let mut shards = shards.into_iter();
        let mut index = shards.next().unwrap_or_default();
        for shard in shards {
            for (key, positions) in shard {
                index.entry(key).or_default().extend(positions);
            }
        }
        index
    }

    fn probe_range(&self, left_cols: &[&Column], index: &JoinIndex, rows: Range<usize>) -> Vec<RowPair> {
        let keep_unmatched = matches!(self.join_type, JoinType::Left | JoinType::Outer);
        let mut pairs = Vec::with_capacity(rows.len());
        for row in rows {
            match row_key(left_cols, row).and_then(|key| index.get(&key)) {
                Some(matches) => pairs.extend(matches.iter().map(|&r| (Some(row), Some(r)))),
                None if keep_unmatched => pairs.push((Some(row), None)),
                None => {}
            }
        }
        pairs
    }

    /// Probes the index with every left row, in parallel chunks when large.
    fn probe(
        &self,
        left_cols: &[&Column],
        index: &JoinIndex,
        rows: usize,
        executor: &QueryExecutor,
    ) -> Vec<RowPair> {
        if rows < executor.config().parallel_threshold || executor.num_threads() < 2 {
            return self.probe_range(left_cols, index, 0..rows);
        }

        let chunk_rows = executor.config().chunk_size.max(1);
        let chunks: Vec<Vec<RowPair>> = executor.install(|| {
            (0..rows.div_ceil(chunk_rows))
                .into_par_iter()
                .map(|c| {
                    self.probe_range(left_cols, index, c * chunk_rows..((c + 1) * chunk_rows).min(rows))
                })
                .collect()
        });
        chunks.concat()
    }

    /// Runs the join.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` when key lists differ in length, are empty, or
    /// name missing columns, and `TypeMismatch` when paired key columns have
    /// different kinds.
    pub fn execute(&self, left: &Table, right: &Table, executor: &QueryExecutor) -> Result<Table> {
        let (left_cols, right_cols) = self.key_columns(left, right)?;

        let index = self.build(&right_cols, right.num_rows(), executor);
        let mut pairs = self.probe(&left_cols, &index, left.num_rows(), executor);

        if matches!(self.join_type, JoinType::Right | JoinType::Outer) {
            let mut matched = executor
                .memory_pool()
                .acquire(words_for_bits(right.num_rows()));
            for (_, r) in &pairs {
                if let Some(r) = r {
                    matched.set_bit(*r);
                }
            }
            pairs.extend(
                (0..right.num_rows())
                    .filter(|&r| !matched.bit(r))
                    .map(|r| (None, Some(r))),
            );
        }

        debug!(
            join_type = %self.join_type,
            build_rows = right.num_rows(),
            probe_rows = left.num_rows(),
            output_rows = pairs.len(),
            "hash join finished"
        );

        self.assemble(left, right, &pairs)
    }

    fn assemble(&self, left: &Table, right: &Table, pairs: &[RowPair]) -> Result<Table> {
        let left_idx: Vec<Option<usize>> = pairs.iter().map(|p| p.0).collect();
        let right_idx: Vec<Option<usize>> = pairs.iter().map(|p| p.1).collect();

        let mut columns = Vec::with_capacity(left.num_columns() + right.num_columns());
        for (name, column) in left.iter() {
            let out = match self.left_keys.iter().position(|k| k == name) {
                Some(k) => gather_key(column, right.column(&self.right_keys[k])?, pairs)?,
                None => column.take_optional(&left_idx),
            };
            columns.push((name.to_string(), Arc::new(out)));
        }
        for (name, column) in right.iter() {
            if self.right_keys.iter().any(|k| k == name) {
                continue;
            }
            let out_name = if left.has_column(name) {
                format!("{name}{RIGHT_SUFFIX}")
            } else {
                name.to_string()
            };
            columns.push((out_name, Arc::new(column.take_optional(&right_idx))));
        }

        Table::with_row_count(columns, pairs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;

    fn executor() -> QueryExecutor {
        QueryExecutor::with_default_config().unwrap()
    }

    fn a() -> Table {
        Table::new(vec![
            ("id", Column::from(vec![1i64, 2, 3])),
            ("v", Column::from(vec![10i64, 20, 30])),
        ])
        .unwrap()
    }

    fn b() -> Table {
        Table::new(vec![
            ("id", Column::from(vec![2i64, 3, 4])),
            ("w", Column::from(vec![200i64, 300, 400])),
        ])
        .unwrap()
    }

    fn ints(t: &Table, name: &str) -> Vec<Option<i64>> {
        t.column(name).unwrap().as_integer().unwrap().to_vec()
    }

    #[test]
    fn test_inner() {
        let out = join(&a(), &b(), &["id"], &["id"], JoinType::Inner, &executor()).unwrap();
        assert_eq!(out.column_names(), vec!["id", "v", "w"]);
        assert_eq!(ints(&out, "id"), vec![Some(2), Some(3)]);
        assert_eq!(ints(&out, "w"), vec![Some(200), Some(300)]);
    }

    #[test]
    fn test_left() {
        let out = join(&a(), &b(), &["id"], &["id"], JoinType::Left, &executor()).unwrap();
        assert_eq!(ints(&out, "id"), vec![Some(1), Some(2), Some(3)]);
        assert_eq!(ints(&out, "v"), vec![Some(10), Some(20), Some(30)]);
        assert_eq!(ints(&out, "w"), vec![None, Some(200), Some(300)]);
    }

    #[test]
    fn test_right_keeps_right_key_values() {
        let out = join(&a(), &b(), &["id"], &["id"], JoinType::Right, &executor()).unwrap();
        assert_eq!(ints(&out, "id"), vec![Some(2), Some(3), Some(4)]);
        assert_eq!(ints(&out, "v"), vec![Some(20), Some(30), None]);
        assert_eq!(ints(&out, "w"), vec![Some(200), Some(300), Some(400)]);
    }

    #[test]
    fn test_outer() {
        let out = join(&a(), &b(), &["id"], &["id"], JoinType::Outer, &executor()).unwrap();
        assert_eq!(out.num_rows(), 4);
        assert_eq!(ints(&out, "id"), vec![Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(ints(&out, "v"), vec![Some(10), Some(20), Some(30), None]);
        assert_eq!(ints(&out, "w"), vec![None, Some(200), Some(300), Some(400)]);
    }

    #[test]
    fn test_duplicate_matches_follow_right_order() {
        let left = Table::new(vec![("k", Column::from(vec!["x", "y"]))]).unwrap();
        let right = Table::new(vec![
            ("k", Column::from(vec!["y", "x", "x"])),
            ("n", Column::from(vec![1i64, 2, 3])),
        ])
        .unwrap();
        let out = join(&left, &right, &["k"], &["k"], JoinType::Inner, &executor()).unwrap();
        assert_eq!(ints(&out, "n"), vec![Some(2), Some(3), Some(1)]);
    }

    #[test]
    fn test_null_keys_never_match() {
        let left = Table::new(vec![
            ("k", Column::from(vec![None, Some(1i64)])),
            ("l", Column::from(vec!["n", "one"])),
        ])
        .unwrap();
        let right = Table::new(vec![
            ("k", Column::from(vec![None, Some(1i64)])),
            ("r", Column::from(vec!["N", "ONE"])),
        ])
        .unwrap();
        let inner = join(&left, &right, &["k"], &["k"], JoinType::Inner, &executor()).unwrap();
        assert_eq!(inner.num_rows(), 1);
        let outer = join(&left, &right, &["k"], &["k"], JoinType::Outer, &executor()).unwrap();
        assert_eq!(outer.num_rows(), 3);
        assert_eq!(ints(&outer, "k"), vec![None, Some(1), None]);
        assert_eq!(outer.value(2, "r").unwrap(), Value::String("N".into()));
        assert!(outer.is_null(2, "l").unwrap());
    }

    #[test]
    fn test_float_keys_nan_and_signed_zero() {
        let left = Table::new(vec![("f", Column::from(vec![f64::NAN, -0.0]))]).unwrap();
        let right = Table::new(vec![
            ("f", Column::from(vec![f64::NAN, 0.0])),
            ("hit", Column::from(vec![1i64, 2])),
        ])
        .unwrap();
        let out = join(&left, &right, &["f"], &["f"], JoinType::Inner, &executor()).unwrap();
        assert_eq!(ints(&out, "hit"), vec![Some(2)]);
    }

    #[test]
    fn test_composite_keys_with_different_names() {
        let left = Table::new(vec![
            ("a", Column::from(vec![1i64, 1, 2])),
            ("b", Column::from(vec!["x", "y", "x"])),
        ])
        .unwrap();
        let right = Table::new(vec![
            ("c", Column::from(vec![1i64, 2])),
            ("d", Column::from(vec!["y", "x"])),
            ("b", Column::from(vec![true, false])),
        ])
        .unwrap();
        let out = join(&left, &right, &["a", "b"], &["c", "d"], JoinType::Inner, &executor()).unwrap();
        assert_eq!(out.column_names(), vec!["a", "b", "b_right"]);
        assert_eq!(ints(&out, "a"), vec![Some(1), Some(2)]);
        assert_eq!(
            out.column("b_right").unwrap().as_ref(),
            &Column::from(vec![true, false])
        );
    }

    #[test]
    fn test_validation_errors() {
        let ex = executor();
        let err = join(&a(), &b(), &["id"], &["id", "w"], JoinType::Inner, &ex).unwrap_err();
        assert!(matches!(err, ColflowError::SchemaError(_)));
        let err = join(&a(), &b(), &["nope"], &["id"], JoinType::Inner, &ex).unwrap_err();
        assert!(matches!(err, ColflowError::SchemaError(_)));
        let strings = Table::new(vec![("id", Column::from(vec!["1"]))]).unwrap();
        let err = join(&a(), &strings, &["id"], &["id"], JoinType::Inner, &ex).unwrap_err();
        assert!(matches!(err, ColflowError::TypeMismatch { .. }));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let n = 5000i64;
        let left = Table::new(vec![
            ("k", Column::from((0..n).map(|i| Some(i % 97)).collect::<Vec<_>>())),
            ("l", Column::from((0..n).collect::<Vec<_>>())),
        ])
        .unwrap();
        let right = Table::new(vec![
            ("k", Column::from((0..n).map(|i| Some(i % 89 + 50)).collect::<Vec<_>>())),
            ("r", Column::from((0..n).collect::<Vec<_>>())),
        ])
        .unwrap();

        let sequential = QueryExecutor::new(ExecutorConfig::new().with_num_threads(1)).unwrap();
        let parallel = QueryExecutor::new(
            ExecutorConfig::new()
                .with_num_threads(4)
                .with_parallel_threshold(100)
                .with_chunk_size(333),
        )
        .unwrap();
        for join_type in [JoinType::Inner, JoinType::Left, JoinType::Right, JoinType::Outer] {
            let s = join(&left, &right, &["k"], &["k"], join_type, &sequential).unwrap();
            let p = join(&left, &right, &["k"], &["k"], join_type, &parallel).unwrap();
            assert_eq!(s, p, "{join_type} join differs");
        }
        assert_eq!(parallel.memory_pool().stats().outstanding, 0);
    }
}
