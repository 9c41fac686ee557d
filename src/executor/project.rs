//! Project operator.

use crate::error::Result;
use crate::executor::{Evaluator, PhysicalOperator, QueryExecutor};
use crate::expr::Expr;
use crate::storage::Table;

/// Evaluates named expressions into output columns.
///
/// In projection mode the output holds exactly the listed columns. In
/// with-columns mode the input columns are kept and each expression adds a
/// column or replaces a same-named one in place. All expressions see the
/// input table, not each other's results.
#[derive(Debug, Clone)]
pub struct ProjectOperator {
    /// (`output_name`, expression) pairs.
    expressions: Vec<(String, Expr)>,
    keep_input: bool,
}

impl ProjectOperator {
    /// Creates an operator that outputs only `expressions`.
    #[must_use]
    pub fn project(expressions: Vec<(String, Expr)>) -> Self {
        ProjectOperator {
            expressions,
            keep_input: false,
        }
    }

    /// Creates an operator that adds or replaces columns.
    #[must_use]
    pub fn with_columns(expressions: Vec<(String, Expr)>) -> Self {
        ProjectOperator {
            expressions,
            keep_input: true,
        }
    }

    /// Returns the column names produced by the expressions.
    #[must_use]
    pub fn output_columns(&self) -> Vec<&str> {
        self.expressions.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl PhysicalOperator for ProjectOperator {
    fn execute(&self, input: &Table, _executor: &QueryExecutor) -> Result<Table> {
        let evaluated = self
            .expressions
            .iter()
            .map(|(name, expr)| Ok((name.clone(), Evaluator::evaluate(expr, input)?)))
            .collect::<Result<Vec<_>>>()?;

        if self.keep_input {
            evaluated
                .into_iter()
                .try_fold(input.clone(), |table, (name, column)| {
                    table.with_column(name, column)
                })
        } else {
            Table::with_row_count(evaluated, input.num_rows())
        }
    }
}
