//! Query planner module.
//!
//! Plans are built with [`LazyFrame`] and rewritten by an [`Optimizer`]
//! before execution.

mod lazy;
pub mod logical_plan;
pub mod optimizer;

pub use lazy::{LazyFrame, LazyGroupBy};
pub use logical_plan::{FusedStep, JoinType, LogicalPlan, SortExpr};
pub use optimizer::{
    transform_up, FusionRule, OptimizerRule, PredicateSimplificationRule, Transformed,
};

use tracing::debug;

use crate::error::Result;

/// Ordered set of optimizer rules applied to a plan.
pub struct Optimizer {
    optimizer_rules: Vec<Box<dyn OptimizerRule>>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    /// Creates an optimizer with the default rules (predicate simplification).
    #[must_use]
    pub fn new() -> Self {
        Optimizer {
            optimizer_rules: vec![Box::new(PredicateSimplificationRule)],
        }
    }

    /// Creates an optimizer without any rules.
    #[must_use]
    pub fn without_optimization() -> Self {
        Optimizer {
            optimizer_rules: Vec::new(),
        }
    }

    /// Adds expression fusion after the existing rules.
    #[must_use]
    pub fn with_fusion(mut self) -> Self {
        self.add_rule(Box::new(FusionRule));
        self
    }

    /// Adds an optimizer rule.
    pub fn add_rule(&mut self, rule: Box<dyn OptimizerRule>) {
        self.optimizer_rules.push(rule);
    }

    /// Returns the rule names in application order.
    #[must_use]
    pub fn rule_names(&self) -> Vec<&str> {
        self.optimizer_rules.iter().map(|r| r.name()).collect()
    }

    /// Applies all optimizer rules to the logical plan.
    pub fn optimize(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        self.optimize_with_tracking(plan).map(|(plan, _)| plan)
    }

    /// Applies all optimizer rules and returns both the plan and applied rules.
    pub fn optimize_with_tracking(&self, plan: LogicalPlan) -> Result<(LogicalPlan, Vec<String>)> {
        let mut current_plan = plan;
        let mut applied_rules = Vec::new();

        for rule in &self.optimizer_rules {
            let transformed = transform_up(rule.as_ref(), current_plan)?;
            if transformed.was_transformed() {
                debug!(rule = rule.name(), "optimizer rule rewrote plan");
                applied_rules.push(rule.name().to_string());
            }
            current_plan = transformed.into_inner();
        }

        Ok((current_plan, applied_rules))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::expr::{col, lit};
    use crate::storage::{Column, Table};

    #[test]
    fn test_tracking_reports_applied_rules() {
        let table = Table::new(vec![("a", Column::from(vec![1i64]))]).unwrap();
        let plan = LogicalPlan::filter(
            LogicalPlan::scan(Arc::new(table)),
            col("a").gt(lit(0)).and(lit(true)),
        );
        let optimizer = Optimizer::new().with_fusion();
        assert_eq!(
            optimizer.rule_names(),
            vec!["PredicateSimplification", "ExpressionFusion"]
        );
        let (plan, applied) = optimizer.optimize_with_tracking(plan).unwrap();
        assert_eq!(applied, vec!["PredicateSimplification", "ExpressionFusion"]);
        assert_eq!(plan.name(), "Fused");
    }

    #[test]
    fn test_without_optimization_is_identity() {
        let table = Table::new(vec![("a", Column::from(vec![1i64]))]).unwrap();
        let plan = LogicalPlan::filter(LogicalPlan::scan(Arc::new(table)), lit(true));
        let (plan, applied) = Optimizer::without_optimization()
            .optimize_with_tracking(plan)
            .unwrap();
        assert!(applied.is_empty());
        assert_eq!(plan.name(), "Filter");
    }
}
