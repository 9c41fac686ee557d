//! Query optimization rules.
//!
//! Rules rewrite one plan node at a time; [`transform_up`] drives a rule over
//! a whole tree, children first. Every rule must preserve results exactly.

mod fusion;

pub use fusion::FusionRule;

use crate::error::Result;
use crate::expr::{BinaryOp, Expr};
use crate::types::Value;

use super::logical_plan::LogicalPlan;

/// Result of optimization transformation.
#[derive(Debug)]
pub enum Transformed<T> {
    /// Plan was modified.
    Yes(T),
    /// Plan unchanged.
    No(T),
}

impl<T> Transformed<T> {
    /// Returns the inner value.
    pub fn into_inner(self) -> T {
        match self {
            Transformed::Yes(v) | Transformed::No(v) => v,
        }
    }

    /// Returns true if the plan was modified.
    #[must_use]
    pub fn was_transformed(&self) -> bool {
        matches!(self, Transformed::Yes(_))
    }
}

/// Optimizer rule trait.
pub trait OptimizerRule: Send + Sync {
    /// Returns the name of this rule.
    fn name(&self) -> &str;

    /// Rewrites a single plan node if applicable.
    ///
    /// Children have already been rewritten when this is called from
    /// [`transform_up`].
    fn rewrite(&self, plan: LogicalPlan) -> Result<Transformed<LogicalPlan>>;
}

/// Applies `rule` to every node of `plan`, children before parents.
pub fn transform_up(rule: &dyn OptimizerRule, plan: LogicalPlan) -> Result<Transformed<LogicalPlan>> {
    let children = plan.map_children(&mut |child| transform_up(rule, child))?;
    let children_changed = children.was_transformed();
    let node = rule.rewrite(children.into_inner())?;
    Ok(if children_changed || node.was_transformed() {
        Transformed::Yes(node.into_inner())
    } else {
        node
    })
}

/// Removes operands that cannot change a boolean result.
///
/// Under three-valued logic `x AND true` and `x OR false` both equal `x`,
/// including when `x` is null.
fn simplify_predicate(expr: Expr) -> Transformed<Expr> {
    match expr {
        Expr::Binary { left, op, right } if matches!(op, BinaryOp::And | BinaryOp::Or) => {
            let left = simplify_predicate(*left);
            let right = simplify_predicate(*right);
            let changed = left.was_transformed() || right.was_transformed();
            let (left, right) = (left.into_inner(), right.into_inner());

            let identity = Expr::Literal(Value::Boolean(op == BinaryOp::And));
            if right == identity {
                Transformed::Yes(left)
            } else if left == identity {
                Transformed::Yes(right)
            } else {
                let rebuilt = Expr::binary(left, op, right);
                if changed {
                    Transformed::Yes(rebuilt)
                } else {
                    Transformed::No(rebuilt)
                }
            }
        }
        other => Transformed::No(other),
    }
}

/// Predicate simplification rule.
///
/// Drops identity operands from filter predicates and removes filters whose
/// predicate is the literal `true`.
pub struct PredicateSimplificationRule;

impl OptimizerRule for PredicateSimplificationRule {
    fn name(&self) -> &str {
        "PredicateSimplification"
    }

    fn rewrite(&self, plan: LogicalPlan) -> Result<Transformed<LogicalPlan>> {
        match plan {
            LogicalPlan::Filter { input, predicate } => {
                let simplified = simplify_predicate(predicate);
                let changed = simplified.was_transformed();
                let predicate = simplified.into_inner();

                if predicate.is_true_literal() {
                    Ok(Transformed::Yes(*input))
                } else if changed {
                    Ok(Transformed::Yes(LogicalPlan::Filter { input, predicate }))
                } else {
                    Ok(Transformed::No(LogicalPlan::Filter { input, predicate }))
                }
            }
            _ => Ok(Transformed::No(plan)),
        }
    }
}
