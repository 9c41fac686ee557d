//! Filter operator.

use crate::error::{ColflowError, Result};
use crate::executor::{Evaluator, PhysicalOperator, QueryExecutor};
use crate::expr::Expr;
use crate::storage::{words_for_bits, Table, WORD_BITS};
use crate::types::DataType;

/// Keeps the rows whose predicate evaluates to true.
///
/// Rows where the predicate is false or null are dropped. The selection is
/// staged in a pooled bitmap before rows are gathered.
#[derive(Debug, Clone)]
pub struct FilterOperator {
    predicate: Expr,
}

impl FilterOperator {
    /// Creates a new filter operator with the given predicate.
    #[must_use]
    pub fn new(predicate: Expr) -> Self {
        FilterOperator { predicate }
    }
}

impl PhysicalOperator for FilterOperator {
    fn execute(&self, input: &Table, executor: &QueryExecutor) -> Result<Table> {
        let mask = Evaluator::evaluate_predicate(&self.predicate, input)?;
        let Some(cells) = mask.as_boolean() else {
            return Err(ColflowError::type_mismatch(
                format!("{} predicate", DataType::Boolean.name()),
                mask.data_type().name(),
            ));
        };

        let mut selection = executor
            .memory_pool()
            .acquire(words_for_bits(cells.len()));
        for (row, cell) in cells.iter().enumerate() {
            if *cell == Some(true) {
                selection.set_bit(row);
            }
        }

        let selected = selection.count_ones();
        if selected == input.num_rows() {
            return Ok(input.clone());
        }

        let mut indices = Vec::with_capacity(selected);
        for (word_idx, &word) in selection.iter().enumerate() {
            let mut bits = word;
            while bits != 0 {
                indices.push(word_idx * WORD_BITS + bits.trailing_zeros() as usize);
                bits &= bits - 1;
            }
        }
        Ok(input.take(&indices))
    }
}
