//! Executor module for query execution.
//!
//! [`QueryExecutor`] materializes a [`LogicalPlan`] with one bottom-up walk,
//! left input before right. Each node runs an operator over fully
//! materialized input tables; only fused chains and joins fan out onto the
//! session's worker pool.

mod aggregate;
mod evaluator;
mod filter;
mod fused;
mod join;
mod limit;
mod pivot;
mod project;
mod sort;

use std::sync::OnceLock;

use rayon::ThreadPool;
use tracing::debug;

use crate::error::{ColflowError, Result};
use crate::planner::LogicalPlan;
use crate::storage::{MemoryPool, Table};

pub use aggregate::{group_by, GroupedTable};
pub use evaluator::Evaluator;
pub use filter::FilterOperator;
pub use fused::FusedOperator;
pub use join::{join, HashJoinOperator};
pub use limit::LimitOperator;
pub use pivot::{pivot, unpivot};
pub use project::ProjectOperator;
pub use sort::SortOperator;

/// Default number of rows per fused chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Default row count above which joins build and probe in parallel.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 8192;

/// A physical operator over one materialized input.
pub trait PhysicalOperator: Send + Sync {
    /// Produces a new table from `input`.
    fn execute(&self, input: &Table, executor: &QueryExecutor) -> Result<Table>;
}

/// Configuration for the query executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of rows per chunk for fused execution.
    pub chunk_size: usize,
    /// Worker threads (None = available parallelism).
    pub num_threads: Option<usize>,
    /// Row count at which join build/probe switch to parallel shards.
    pub parallel_threshold: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            num_threads: None,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl ExecutorConfig {
    /// Creates a new executor configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk size (at least 1).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads.max(1));
        self
    }

    /// Sets the parallel join threshold.
    #[must_use]
    pub fn with_parallel_threshold(mut self, parallel_threshold: usize) -> Self {
        self.parallel_threshold = parallel_threshold;
        self
    }
}

/// Query executor for executing logical plans.
///
/// Owns the session's scratch [`MemoryPool`] and rayon worker pool. An
/// executor can run any number of plans, one after another or from several
/// threads at once.
pub struct QueryExecutor {
    /// Executor configuration.
    config: ExecutorConfig,
    /// Scratch buffers shared by all operators of this session.
    memory_pool: MemoryPool,
    /// Workers for fused chunks and parallel joins.
    workers: ThreadPool,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("config", &self.config)
            .field("num_threads", &self.workers.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl QueryExecutor {
    /// Creates a new query executor with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ThreadPool` if the worker threads cannot be spawned.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        let num_threads = config.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        });
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("colflow-worker-{i}"))
            .build()
            .map_err(|e| ColflowError::ThreadPool(e.to_string()))?;

        Ok(Self {
            config,
            memory_pool: MemoryPool::new(),
            workers,
        })
    }

    /// Creates a query executor with the default configuration.
    ///
    /// # Errors
    ///
    /// Same as [`QueryExecutor::new`].
    pub fn with_default_config() -> Result<Self> {
        Self::new(ExecutorConfig::default())
    }

    /// Returns the process-wide default executor, creating it on first use.
    ///
    /// Its worker pool and memory pool are shared by every caller.
    ///
    /// # Errors
    ///
    /// Same as [`QueryExecutor::new`]; a failed first build is retried on
    /// the next call.
    pub fn shared() -> Result<&'static QueryExecutor> {
        static SHARED: OnceLock<QueryExecutor> = OnceLock::new();
        if let Some(executor) = SHARED.get() {
            return Ok(executor);
        }
        let executor = Self::with_default_config()?;
        Ok(SHARED.get_or_init(|| executor))
    }

    /// Returns the executor configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Returns the session memory pool.
    #[must_use]
    pub fn memory_pool(&self) -> &MemoryPool {
        &self.memory_pool
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.workers.current_num_threads()
    }

    /// Runs `op` inside the worker pool so rayon iterators use its threads.
    pub(crate) fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.workers.install(op)
    }

    /// Materializes `plan` into a new table.
    ///
    /// # Errors
    ///
    /// Errors raised by a node are wrapped in `ColflowError::NodeFailed`
    /// naming that node; see [`ColflowError::root_cause`].
    pub fn execute(&self, plan: &LogicalPlan) -> Result<Table> {
        let node = plan.name();
        let attribute = |e: ColflowError| e.at_node(node);

        let output = match plan {
            LogicalPlan::Scan { table } => table.as_ref().clone(),
            LogicalPlan::Filter { input, predicate } => {
                let input = self.execute(input)?;
                FilterOperator::new(predicate.clone())
                    .execute(&input, self)
                    .map_err(attribute)?
            }
            LogicalPlan::Project { input, expressions } => {
                let input = self.execute(input)?;
                ProjectOperator::project(expressions.clone())
                    .execute(&input, self)
                    .map_err(attribute)?
            }
            LogicalPlan::WithColumns { input, expressions } => {
                let input = self.execute(input)?;
                ProjectOperator::with_columns(expressions.clone())
                    .execute(&input, self)
                    .map_err(attribute)?
            }
            LogicalPlan::Join {
                left,
                right,
                left_keys,
                right_keys,
                join_type,
            } => {
                let left = self.execute(left)?;
                let right = self.execute(right)?;
                HashJoinOperator::new(left_keys.clone(), right_keys.clone(), *join_type)
                    .execute(&left, &right, self)
                    .map_err(attribute)?
            }
            LogicalPlan::Aggregate {
                input,
                group_by: keys,
                aggregates,
            } => {
                let input = self.execute(input)?;
                let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                group_by(&input, &keys, self)
                    .and_then(|grouped| grouped.agg_exprs(aggregates))
                    .map_err(attribute)?
            }
            LogicalPlan::Pivot {
                input,
                index,
                columns,
                values,
                agg,
            } => {
                let input = self.execute(input)?;
                pivot(&input, index, columns, values, *agg, self).map_err(attribute)?
            }
            LogicalPlan::Unpivot {
                input,
                index,
                value_columns,
                variable_name,
                value_name,
            } => {
                let input = self.execute(input)?;
                let index: Vec<&str> = index.iter().map(String::as_str).collect();
                let value_columns: Vec<&str> = value_columns.iter().map(String::as_str).collect();
                unpivot(&input, &index, &value_columns, variable_name, value_name)
                    .map_err(attribute)?
            }
            LogicalPlan::Sort { input, order_by } => {
                let input = self.execute(input)?;
                SortOperator::new(order_by.clone())
                    .execute(&input, self)
                    .map_err(attribute)?
            }
            LogicalPlan::Limit { input, skip, limit } => {
                let input = self.execute(input)?;
                LimitOperator::new(*skip, *limit)
                    .execute(&input, self)
                    .map_err(attribute)?
            }
            LogicalPlan::Fused { input, steps } => {
                let input = self.execute(input)?;
                FusedOperator::new(steps)
                    .execute(&input, self)
                    .map_err(attribute)?
            }
        };

        debug!(node, rows = output.num_rows(), "plan node finished");
        Ok(output)
    }
}
