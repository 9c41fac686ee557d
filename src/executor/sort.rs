//! Sort operator.

use std::cmp::Ordering;

use crate::error::Result;
use crate::executor::{PhysicalOperator, QueryExecutor};
use crate::planner::SortExpr;
use crate::storage::{Column, Table};

/// Stable multi-key sort.
///
/// Rows that tie on every key keep their input order. Null placement follows
/// `nulls_first` regardless of direction; floats order by `total_cmp`.
#[derive(Debug, Clone)]
pub struct SortOperator {
    order_by: Vec<SortExpr>,
}

impl SortOperator {
    #[must_use]
    pub fn new(order_by: Vec<SortExpr>) -> Self {
        SortOperator { order_by }
    }
}

/// Compares two non-null cells of the same column.
fn compare_cells(column: &Column, a: usize, b: usize) -> Option<Ordering> {
    match column {
        Column::Integer(v) => Some(v[a]?.cmp(&v[b]?)),
        Column::Float(v) => Some(v[a]?.total_cmp(&v[b]?)),
        Column::String(v) => Some(v[a].as_ref()?.cmp(v[b].as_ref()?)),
        Column::Boolean(v) => Some(v[a]?.cmp(&v[b]?)),
    }
}

impl PhysicalOperator for SortOperator {
    fn execute(&self, input: &Table, _executor: &QueryExecutor) -> Result<Table> {
        let keys = self
            .order_by
            .iter()
            .map(|s| Ok((input.column(&s.column)?, s)))
            .collect::<Result<Vec<_>>>()?;

        let mut indices: Vec<usize> = (0..input.num_rows()).collect();
        indices.sort_by(|&a, &b| {
            for (column, order) in &keys {
                let ordering = match (column.is_null(a), column.is_null(b)) {
                    (true, true) => Ordering::Equal,
                    (true, false) if order.nulls_first => Ordering::Less,
                    (true, false) => Ordering::Greater,
                    (false, true) if order.nulls_first => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => {
                        let ord = compare_cells(column, a, b).unwrap_or(Ordering::Equal);
                        if order.descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    }
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        Ok(input.take(&indices))
    }
}
