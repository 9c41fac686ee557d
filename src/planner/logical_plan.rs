//! Logical plan definitions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::expr::{AggregateFunction, Expr};
use crate::storage::Table;

use super::optimizer::Transformed;

/// Logical query plan (what to compute).
///
/// Each node owns its inputs; a plan is a tree with the base table scans at
/// the leaves.
#[derive(Debug, Clone)]
pub enum LogicalPlan {
    /// Read a base table.
    Scan { table: Arc<Table> },

    /// Keep rows where the predicate is true.
    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },

    /// Replace the columns with the given named expressions.
    Project {
        input: Box<LogicalPlan>,
        /// (`output_name`, expression).
        expressions: Vec<(String, Expr)>,
    },

    /// Add or replace columns, keeping the rest.
    WithColumns {
        input: Box<LogicalPlan>,
        expressions: Vec<(String, Expr)>,
    },

    /// Hash join on equal key columns.
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        left_keys: Vec<String>,
        right_keys: Vec<String>,
        join_type: JoinType,
    },

    /// Aggregation with GROUP BY.
    Aggregate {
        input: Box<LogicalPlan>,
        group_by: Vec<String>,
        aggregates: Vec<(String, Expr)>,
    },

    /// Long to wide reshape.
    Pivot {
        input: Box<LogicalPlan>,
        index: String,
        columns: String,
        values: String,
        agg: AggregateFunction,
    },

    /// Wide to long reshape.
    Unpivot {
        input: Box<LogicalPlan>,
        index: Vec<String>,
        value_columns: Vec<String>,
        variable_name: String,
        value_name: String,
    },

    /// Stable multi-key sort.
    Sort {
        input: Box<LogicalPlan>,
        order_by: Vec<SortExpr>,
    },

    /// Limit/Skip rows.
    Limit {
        input: Box<LogicalPlan>,
        skip: Option<usize>,
        limit: Option<usize>,
    },

    /// A chain of row-local steps run together over row chunks.
    Fused {
        input: Box<LogicalPlan>,
        steps: Vec<FusedStep>,
    },
}

/// One step of a [`LogicalPlan::Fused`] node, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FusedStep {
    Filter(Expr),
    Project(Vec<(String, Expr)>),
    WithColumns(Vec<(String, Expr)>),
}

impl LogicalPlan {
    /// Creates a scan plan.
    #[must_use]
    pub fn scan(table: Arc<Table>) -> Self {
        LogicalPlan::Scan { table }
    }

    /// Creates a filter plan.
    #[must_use]
    pub fn filter(input: LogicalPlan, predicate: Expr) -> Self {
        LogicalPlan::Filter {
            input: Box::new(input),
            predicate,
        }
    }

    /// Creates a project plan.
    #[must_use]
    pub fn project(input: LogicalPlan, expressions: Vec<(String, Expr)>) -> Self {
        LogicalPlan::Project {
            input: Box::new(input),
            expressions,
        }
    }

    /// Creates a plan adding or replacing columns.
    #[must_use]
    pub fn with_columns(input: LogicalPlan, expressions: Vec<(String, Expr)>) -> Self {
        LogicalPlan::WithColumns {
            input: Box::new(input),
            expressions,
        }
    }

    /// Creates a join plan.
    #[must_use]
    pub fn join(
        left: LogicalPlan,
        right: LogicalPlan,
        left_keys: Vec<String>,
        right_keys: Vec<String>,
        join_type: JoinType,
    ) -> Self {
        LogicalPlan::Join {
            left: Box::new(left),
            right: Box::new(right),
            left_keys,
            right_keys,
            join_type,
        }
    }

    /// Creates an aggregate plan.
    #[must_use]
    pub fn aggregate(
        input: LogicalPlan,
        group_by: Vec<String>,
        aggregates: Vec<(String, Expr)>,
    ) -> Self {
        LogicalPlan::Aggregate {
            input: Box::new(input),
            group_by,
            aggregates,
        }
    }

    /// Creates a pivot plan.
    #[must_use]
    pub fn pivot(
        input: LogicalPlan,
        index: impl Into<String>,
        columns: impl Into<String>,
        values: impl Into<String>,
        agg: AggregateFunction,
    ) -> Self {
        LogicalPlan::Pivot {
            input: Box::new(input),
            index: index.into(),
            columns: columns.into(),
            values: values.into(),
            agg,
        }
    }

    /// Creates an unpivot plan.
    #[must_use]
    pub fn unpivot(
        input: LogicalPlan,
        index: Vec<String>,
        value_columns: Vec<String>,
        variable_name: impl Into<String>,
        value_name: impl Into<String>,
    ) -> Self {
        LogicalPlan::Unpivot {
            input: Box::new(input),
            index,
            value_columns,
            variable_name: variable_name.into(),
            value_name: value_name.into(),
        }
    }

    /// Creates a sort plan.
    #[must_use]
    pub fn sort(input: LogicalPlan, order_by: Vec<SortExpr>) -> Self {
        LogicalPlan::Sort {
            input: Box::new(input),
            order_by,
        }
    }

    /// Creates a limit plan.
    #[must_use]
    pub fn limit(input: LogicalPlan, skip: Option<usize>, limit: Option<usize>) -> Self {
        LogicalPlan::Limit {
            input: Box::new(input),
            skip,
            limit,
        }
    }

    /// Returns the node name used in EXPLAIN output and error attribution.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            LogicalPlan::Scan { .. } => "Scan",
            LogicalPlan::Filter { .. } => "Filter",
            LogicalPlan::Project { .. } => "Project",
            LogicalPlan::WithColumns { .. } => "WithColumns",
            LogicalPlan::Join { .. } => "Join",
            LogicalPlan::Aggregate { .. } => "Aggregate",
            LogicalPlan::Pivot { .. } => "Pivot",
            LogicalPlan::Unpivot { .. } => "Unpivot",
            LogicalPlan::Sort { .. } => "Sort",
            LogicalPlan::Limit { .. } => "Limit",
            LogicalPlan::Fused { .. } => "Fused",
        }
    }

    /// Returns the child plans, left before right.
    #[must_use]
    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::Scan { .. } => vec![],
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::WithColumns { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Pivot { input, .. }
            | LogicalPlan::Unpivot { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Fused { input, .. } => {
                vec![input.as_ref()]
            }
            LogicalPlan::Join { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
        }
    }

    /// Counts the nodes in this tree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(LogicalPlan::node_count)
            .sum::<usize>()
    }

    /// Rebuilds this node with every child passed through `f`.
    ///
    /// The result is `Transformed::Yes` if any child changed.
    pub fn map_children<F>(self, f: &mut F) -> Result<Transformed<LogicalPlan>>
    where
        F: FnMut(LogicalPlan) -> Result<Transformed<LogicalPlan>>,
    {
        let mut changed = false;
        let mut apply = |child: Box<LogicalPlan>| -> Result<Box<LogicalPlan>> {
            let out = f(*child)?;
            changed |= out.was_transformed();
            Ok(Box::new(out.into_inner()))
        };

        let plan = match self {
            scan @ LogicalPlan::Scan { .. } => scan,
            LogicalPlan::Filter { input, predicate } => LogicalPlan::Filter {
                input: apply(input)?,
                predicate,
            },
            LogicalPlan::Project { input, expressions } => LogicalPlan::Project {
                input: apply(input)?,
                expressions,
            },
            LogicalPlan::WithColumns { input, expressions } => LogicalPlan::WithColumns {
                input: apply(input)?,
                expressions,
            },
            LogicalPlan::Join {
                left,
                right,
                left_keys,
                right_keys,
                join_type,
            } => LogicalPlan::Join {
                left: apply(left)?,
                right: apply(right)?,
                left_keys,
                right_keys,
                join_type,
            },
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
            } => LogicalPlan::Aggregate {
                input: apply(input)?,
                group_by,
                aggregates,
            },
            LogicalPlan::Pivot {
                input,
                index,
                columns,
                values,
                agg,
            } => LogicalPlan::Pivot {
                input: apply(input)?,
                index,
                columns,
                values,
                agg,
            },
            LogicalPlan::Unpivot {
                input,
                index,
                value_columns,
                variable_name,
                value_name,
            } => LogicalPlan::Unpivot {
                input: apply(input)?,
                index,
                value_columns,
                variable_name,
                value_name,
            },
            LogicalPlan::Sort { input, order_by } => LogicalPlan::Sort {
                input: apply(input)?,
                order_by,
            },
            LogicalPlan::Limit { input, skip, limit } => LogicalPlan::Limit {
                input: apply(input)?,
                skip,
                limit,
            },
            LogicalPlan::Fused { input, steps } => LogicalPlan::Fused {
                input: apply(input)?,
                steps,
            },
        };

        Ok(if changed {
            Transformed::Yes(plan)
        } else {
            Transformed::No(plan)
        })
    }
}

/// Join type for hash joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Outer,
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortExpr {
    pub column: String,
    pub descending: bool,
    pub nulls_first: bool,
}

impl SortExpr {
    /// Creates a new ascending sort key.
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        SortExpr {
            column: column.into(),
            descending: false,
            nulls_first: false,
        }
    }

    /// Creates a new descending sort key.
    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        SortExpr {
            column: column.into(),
            descending: true,
            nulls_first: false,
        }
    }

    /// Places nulls before non-null values.
    #[must_use]
    pub fn with_nulls_first(mut self) -> Self {
        self.nulls_first = true;
        self
    }
}

// =============================================================================
// Display implementation for EXPLAIN output
// =============================================================================

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.format_plan(f, 0)
    }
}

fn join_exprs(expressions: &[(String, Expr)]) -> String {
    expressions
        .iter()
        .map(|(name, expr)| {
            if let Expr::Column(c) = expr {
                if c == name {
                    return name.clone();
                }
            }
            format!("{expr} AS {name}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl LogicalPlan {
    /// Formats the plan as a tree with indentation.
    fn format_plan(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let prefix = "  ".repeat(indent);
        let child_prefix = "  ".repeat(indent + 1);

        match self {
            LogicalPlan::Scan { table } => {
                writeln!(
                    f,
                    "{prefix}Scan: [{}] ({} rows)",
                    table.column_names().join(", "),
                    table.num_rows()
                )?;
            }
            LogicalPlan::Filter { predicate, input } => {
                writeln!(f, "{prefix}Filter: {predicate}")?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalPlan::Project { expressions, input } => {
                writeln!(f, "{prefix}Project: [{}]", join_exprs(expressions))?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalPlan::WithColumns { expressions, input } => {
                writeln!(f, "{prefix}WithColumns: [{}]", join_exprs(expressions))?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalPlan::Join {
                left_keys,
                right_keys,
                join_type,
                left,
                right,
            } => {
                writeln!(
                    f,
                    "{prefix}Join: {join_type} ON [{}] = [{}]",
                    left_keys.join(", "),
                    right_keys.join(", ")
                )?;
                writeln!(f, "{child_prefix}Probe Side:")?;
                left.format_plan(f, indent + 2)?;
                writeln!(f, "{child_prefix}Build Side:")?;
                right.format_plan(f, indent + 2)?;
            }
            LogicalPlan::Aggregate {
                group_by,
                aggregates,
                input,
            } => {
                writeln!(
                    f,
                    "{prefix}Aggregate: [{}] GROUP BY [{}]",
                    join_exprs(aggregates),
                    group_by.join(", ")
                )?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalPlan::Pivot {
                index,
                columns,
                values,
                agg,
                input,
            } => {
                writeln!(
                    f,
                    "{prefix}Pivot: index={index} columns={columns} values={agg}({values})"
                )?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalPlan::Unpivot {
                index,
                value_columns,
                variable_name,
                value_name,
                input,
            } => {
                writeln!(
                    f,
                    "{prefix}Unpivot: index=[{}] values=[{}] -> ({variable_name}, {value_name})",
                    index.join(", "),
                    value_columns.join(", ")
                )?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalPlan::Sort { order_by, input } => {
                let orders: Vec<_> = order_by
                    .iter()
                    .map(|s| {
                        let dir = if s.descending { "DESC" } else { "ASC" };
                        let nulls = if s.nulls_first { " NULLS FIRST" } else { "" };
                        format!("{} {dir}{nulls}", s.column)
                    })
                    .collect();
                writeln!(f, "{prefix}Sort: [{}]", orders.join(", "))?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalPlan::Limit { skip, limit, input } => {
                let parts: Vec<String> = skip
                    .map(|s| format!("SKIP {s}"))
                    .into_iter()
                    .chain(limit.map(|l| format!("LIMIT {l}")))
                    .collect();
                writeln!(f, "{prefix}Limit: {}", parts.join(" "))?;
                input.format_plan(f, indent + 1)?;
            }
            LogicalPlan::Fused { steps, input } => {
                writeln!(f, "{prefix}Fused: {} steps", steps.len())?;
                for step in steps {
                    match step {
                        FusedStep::Filter(predicate) => {
                            writeln!(f, "{child_prefix}- Filter: {predicate}")?;
                        }
                        FusedStep::Project(exprs) => {
                            writeln!(f, "{child_prefix}- Project: [{}]", join_exprs(exprs))?;
                        }
                        FusedStep::WithColumns(exprs) => {
                            writeln!(f, "{child_prefix}- WithColumns: [{}]", join_exprs(exprs))?;
                        }
                    }
                }
                input.format_plan(f, indent + 1)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
            JoinType::Right => write!(f, "RIGHT"),
            JoinType::Outer => write!(f, "OUTER"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, lit};
    use crate::storage::Column;

    fn scan() -> LogicalPlan {
        let table = Table::new(vec![("a", Column::from(vec![1i64, 2]))]).unwrap();
        LogicalPlan::scan(Arc::new(table))
    }

    #[test]
    fn test_children_and_count() {
        let plan = LogicalPlan::join(
            LogicalPlan::filter(scan(), col("a").gt(lit(1))),
            scan(),
            vec!["a".into()],
            vec!["a".into()],
            JoinType::Inner,
        );
        assert_eq!(plan.children().len(), 2);
        assert_eq!(plan.children()[0].name(), "Filter");
        assert_eq!(plan.node_count(), 4);
    }

    #[test]
    fn test_explain_tree() {
        let plan = LogicalPlan::limit(
            LogicalPlan::sort(
                LogicalPlan::project(
                    LogicalPlan::filter(scan(), col("a").gt(lit(1))),
                    vec![("b".into(), col("a") * lit(2))],
                ),
                vec![SortExpr::desc("b")],
            ),
            None,
            Some(5),
        );
        let text = plan.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Limit: LIMIT 5");
        assert_eq!(lines[1], "  Sort: [b DESC]");
        assert_eq!(lines[2], "    Project: [(a * 2) AS b]");
        assert_eq!(lines[3], "      Filter: (a > 1)");
        assert_eq!(lines[4], "        Scan: [a] (2 rows)");
    }

    #[test]
    fn test_map_children_reports_changes() {
        let plan = LogicalPlan::filter(scan(), lit(true));
        let out = plan
            .clone()
            .map_children(&mut |p| Ok(Transformed::No(p)))
            .unwrap();
        assert!(!out.was_transformed());
        let out = plan
            .map_children(&mut |p| Ok(Transformed::Yes(LogicalPlan::limit(p, None, Some(1)))))
            .unwrap();
        assert!(out.was_transformed());
        assert_eq!(out.into_inner().children()[0].name(), "Limit");
    }
}
