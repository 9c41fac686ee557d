//! Expression fusion rule.

use crate::error::Result;

use super::{OptimizerRule, Transformed};
use crate::planner::logical_plan::{FusedStep, LogicalPlan};

/// Expression fusion rule.
///
/// Collapses consecutive `Filter`, `Project` and `WithColumns` nodes into a
/// single `Fused` node whose steps run back to back on each row chunk. Joins,
/// aggregations, reshapes, sorts and limits end a chain.
///
/// Run through [`super::transform_up`]: each row-local node either starts a
/// new fused node over its input or appends itself to the fused node below.
pub struct FusionRule;

impl FusionRule {
    fn fuse(input: Box<LogicalPlan>, step: FusedStep) -> LogicalPlan {
        match *input {
            LogicalPlan::Fused { input, mut steps } => {
                steps.push(step);
                LogicalPlan::Fused { input, steps }
            }
            other => LogicalPlan::Fused {
                input: Box::new(other),
                steps: vec![step],
            },
        }
    }
}

impl OptimizerRule for FusionRule {
    fn name(&self) -> &str {
        "ExpressionFusion"
    }

    fn rewrite(&self, plan: LogicalPlan) -> Result<Transformed<LogicalPlan>> {
        Ok(match plan {
            LogicalPlan::Filter { input, predicate } => {
                Transformed::Yes(Self::fuse(input, FusedStep::Filter(predicate)))
            }
            LogicalPlan::Project { input, expressions } => {
                Transformed::Yes(Self::fuse(input, FusedStep::Project(expressions)))
            }
            LogicalPlan::WithColumns { input, expressions } => {
                Transformed::Yes(Self::fuse(input, FusedStep::WithColumns(expressions)))
            }
            other => Transformed::No(other),
        })
    }
}
