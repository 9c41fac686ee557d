//! Fused chunk-parallel operator.

use rayon::prelude::*;
use tracing::trace;

use crate::error::Result;
use crate::executor::{FilterOperator, PhysicalOperator, ProjectOperator, QueryExecutor};
use crate::planner::FusedStep;
use crate::storage::Table;

/// Runs a chain of row-local steps over row chunks in parallel.
///
/// The input is cut into `chunk_size` row ranges. Each worker pushes its
/// range through every step before the next range is touched, and the chunk
/// outputs are stacked in chunk order once all of them are done. Every step
/// only looks at the rows of its own chunk, so the result is identical to
/// running the steps one after another over the whole table.
pub struct FusedOperator {
    steps: Vec<Box<dyn PhysicalOperator>>,
}

impl FusedOperator {
    /// Builds the physical steps for a fused node.
    #[must_use]
    pub fn new(steps: &[FusedStep]) -> Self {
        let steps = steps
            .iter()
            .map(|step| -> Box<dyn PhysicalOperator> {
                match step {
                    FusedStep::Filter(predicate) => Box::new(FilterOperator::new(predicate.clone())),
                    FusedStep::Project(exprs) => Box::new(ProjectOperator::project(exprs.clone())),
                    FusedStep::WithColumns(exprs) => {
                        Box::new(ProjectOperator::with_columns(exprs.clone()))
                    }
                }
            })
            .collect();
        FusedOperator { steps }
    }

    fn run_steps(&self, chunk: Table, executor: &QueryExecutor) -> Result<Table> {
        self.steps
            .iter()
            .try_fold(chunk, |table, step| step.execute(&table, executor))
    }
}

impl PhysicalOperator for FusedOperator {
    fn execute(&self, input: &Table, executor: &QueryExecutor) -> Result<Table> {
        let rows = input.num_rows();
        let chunk_size = executor.config().chunk_size.max(1);
        // An empty input still runs once so the output schema is produced
        if rows <= chunk_size {
            return self.run_steps(input.clone(), executor);
        }

        let num_chunks = rows.div_ceil(chunk_size);
        let outputs = executor.install(|| {
            (0..num_chunks)
                .into_par_iter()
                .map(|chunk_idx| {
                    let chunk = input.slice(chunk_idx * chunk_size, chunk_size);
                    trace!(chunk = chunk_idx, rows = chunk.num_rows(), "running fused chunk");
                    self.run_steps(chunk, executor)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        Table::concat(&outputs)
    }
}
