//! Lazy, chainable query builder.

use std::sync::Arc;

use crate::error::Result;
use crate::executor::QueryExecutor;
use crate::expr::{AggregateFunction, Expr};
use crate::storage::Table;

use super::{JoinType, LogicalPlan, Optimizer, SortExpr};

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}

fn named(exprs: Vec<Expr>) -> Vec<(String, Expr)> {
    exprs.into_iter().map(|e| (e.output_name(), e)).collect()
}

/// A query under construction.
///
/// Every builder method wraps the current plan in a new node and never
/// fails; columns and kinds are checked when the plan is collected.
///
/// ```
/// use colflow::{col, lit, Column, LazyFrame, Table};
///
/// let table = Table::new(vec![("x", Column::from(vec![1i64, 5, 9]))]).unwrap();
/// let out = LazyFrame::scan(table)
///     .filter(col("x").gt(lit(2)))
///     .with_column("y", col("x") * lit(10))
///     .collect()
///     .unwrap();
/// assert_eq!(out.num_rows(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct LazyFrame {
    plan: LogicalPlan,
    fusion: bool,
}

impl LazyFrame {
    /// Starts a query over a base table.
    #[must_use]
    pub fn scan(table: impl Into<Arc<Table>>) -> Self {
        Self::from_plan(LogicalPlan::scan(table.into()))
    }

    /// Wraps an existing plan.
    #[must_use]
    pub fn from_plan(plan: LogicalPlan) -> Self {
        LazyFrame {
            plan,
            fusion: false,
        }
    }

    /// Returns the unoptimized plan.
    #[must_use]
    pub fn logical_plan(&self) -> &LogicalPlan {
        &self.plan
    }

    fn wrap(self, build: impl FnOnce(LogicalPlan) -> LogicalPlan) -> Self {
        LazyFrame {
            plan: build(self.plan),
            fusion: self.fusion,
        }
    }

    /// Keeps rows where `predicate` is true.
    #[must_use]
    pub fn filter(self, predicate: Expr) -> Self {
        self.wrap(|input| LogicalPlan::filter(input, predicate))
    }

    /// Replaces the columns with `exprs`, each named by its output name.
    #[must_use]
    pub fn select(self, exprs: Vec<Expr>) -> Self {
        self.wrap(|input| LogicalPlan::project(input, named(exprs)))
    }

    /// Adds or replaces one column.
    #[must_use]
    pub fn with_column(self, name: impl Into<String>, expr: Expr) -> Self {
        self.with_columns(vec![(name.into(), expr)])
    }

    /// Adds or replaces several columns; all see the same input.
    #[must_use]
    pub fn with_columns(self, exprs: Vec<(String, Expr)>) -> Self {
        self.wrap(|input| LogicalPlan::with_columns(input, exprs))
    }

    /// Joins with `right` on same-named key columns.
    #[must_use]
    pub fn join(self, right: LazyFrame, on: &[&str], join_type: JoinType) -> Self {
        self.join_on(right, on, on, join_type)
    }

    /// Joins with `right` on `left_on[i] == right_on[i]`.
    #[must_use]
    pub fn join_on(
        self,
        right: LazyFrame,
        left_on: &[&str],
        right_on: &[&str],
        join_type: JoinType,
    ) -> Self {
        self.wrap(|left| {
            LogicalPlan::join(left, right.plan, owned(left_on), owned(right_on), join_type)
        })
    }

    /// Groups rows by `keys`; finish with [`LazyGroupBy::agg`].
    #[must_use]
    pub fn group_by(self, keys: &[&str]) -> LazyGroupBy {
        LazyGroupBy {
            frame: self,
            keys: owned(keys),
        }
    }

    /// Reshapes long to wide; see [`crate::executor::pivot`].
    #[must_use]
    pub fn pivot(self, index: &str, columns: &str, values: &str, agg: AggregateFunction) -> Self {
        self.wrap(|input| LogicalPlan::pivot(input, index, columns, values, agg))
    }

    /// Reshapes wide to long; see [`crate::executor::unpivot`].
    #[must_use]
    pub fn unpivot(
        self,
        index: &[&str],
        value_columns: &[&str],
        variable_name: &str,
        value_name: &str,
    ) -> Self {
        self.wrap(|input| {
            LogicalPlan::unpivot(
                input,
                owned(index),
                owned(value_columns),
                variable_name,
                value_name,
            )
        })
    }

    /// Sorts by the given keys, most significant first.
    #[must_use]
    pub fn sort(self, order_by: Vec<SortExpr>) -> Self {
        self.wrap(|input| LogicalPlan::sort(input, order_by))
    }

    /// Keeps the first `n` rows.
    #[must_use]
    pub fn limit(self, n: usize) -> Self {
        self.wrap(|input| LogicalPlan::limit(input, None, Some(n)))
    }

    /// Skips `offset` rows, then keeps at most `len`.
    #[must_use]
    pub fn slice(self, offset: usize, len: usize) -> Self {
        self.wrap(|input| LogicalPlan::limit(input, Some(offset), Some(len)))
    }

    /// Enables or disables expression fusion for this query.
    #[must_use]
    pub fn with_fusion(mut self, enabled: bool) -> Self {
        self.fusion = enabled;
        self
    }

    fn optimizer(&self) -> Optimizer {
        if self.fusion {
            Optimizer::new().with_fusion()
        } else {
            Optimizer::new()
        }
    }

    /// Returns the plan that [`collect`](Self::collect) would run.
    ///
    /// # Errors
    ///
    /// Returns an error if an optimizer rule fails.
    pub fn optimized_plan(&self) -> Result<LogicalPlan> {
        self.optimizer().optimize(self.plan.clone())
    }

    /// Renders the optimized plan as an indented tree.
    ///
    /// # Errors
    ///
    /// Same as [`optimized_plan`](Self::optimized_plan).
    pub fn explain(&self) -> Result<String> {
        Ok(self.optimized_plan()?.to_string())
    }

    /// Optimizes and runs the query on the shared default executor.
    ///
    /// See [`QueryExecutor::shared`]; use [`collect_with`](Self::collect_with)
    /// to pick the executor.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while materializing, attributed to
    /// the failing node.
    pub fn collect(&self) -> Result<Table> {
        self.collect_with(QueryExecutor::shared()?)
    }

    /// Optimizes and runs the query on `executor`.
    ///
    /// # Errors
    ///
    /// Same as [`collect`](Self::collect).
    pub fn collect_with(&self, executor: &QueryExecutor) -> Result<Table> {
        executor.execute(&self.optimized_plan()?)
    }

    /// Runs the plan as built, skipping every optimizer rule.
    ///
    /// # Errors
    ///
    /// Same as [`collect`](Self::collect).
    pub fn collect_unoptimized(&self) -> Result<Table> {
        QueryExecutor::shared()?.execute(&self.plan)
    }
}

/// A [`LazyFrame`] waiting for its aggregates.
#[derive(Debug, Clone)]
pub struct LazyGroupBy {
    frame: LazyFrame,
    keys: Vec<String>,
}

impl LazyGroupBy {
    /// Aggregates each group; outputs are named by `Expr::output_name`,
    /// e.g. `x_sum` for `col("x").sum()`.
    #[must_use]
    pub fn agg(self, aggregates: Vec<Expr>) -> LazyFrame {
        self.agg_named(named(aggregates))
    }

    /// Aggregates each group into explicitly named columns.
    #[must_use]
    pub fn agg_named(self, aggregates: Vec<(String, Expr)>) -> LazyFrame {
        let keys = self.keys;
        self.frame
            .wrap(|input| LogicalPlan::aggregate(input, keys, aggregates))
    }
}
