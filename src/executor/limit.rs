//! Skip/limit operator.

use crate::error::Result;
use crate::executor::{PhysicalOperator, QueryExecutor};
use crate::storage::Table;

/// Skips `skip` rows, then keeps at most `limit`.
#[derive(Debug, Clone, Copy)]
pub struct LimitOperator {
    skip: Option<usize>,
    limit: Option<usize>,
}

impl LimitOperator {
    #[must_use]
    pub fn new(skip: Option<usize>, limit: Option<usize>) -> Self {
        LimitOperator { skip, limit }
    }
}

impl PhysicalOperator for LimitOperator {
    fn execute(&self, input: &Table, _executor: &QueryExecutor) -> Result<Table> {
        let offset = self.skip.unwrap_or(0);
        let len = self.limit.unwrap_or(usize::MAX);
        if offset == 0 && len >= input.num_rows() {
            return Ok(input.clone());
        }
        Ok(input.slice(offset, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Column;

    #[test]
    fn test_skip_and_limit() {
        let executor = QueryExecutor::with_default_config().unwrap();
        let table = Table::new(vec![("a", Column::from(vec![1i64, 2, 3, 4]))]).unwrap();
        let out = LimitOperator::new(Some(1), Some(2))
            .execute(&table, &executor)
            .unwrap();
        assert_eq!(out.column("a").unwrap().as_ref(), &Column::from(vec![2i64, 3]));
        let out = LimitOperator::new(Some(10), None)
            .execute(&table, &executor)
            .unwrap();
        assert_eq!(out.num_rows(), 0);
        assert_eq!(out.column_names(), vec!["a"]);
    }
}
