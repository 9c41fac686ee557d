//! colflow - in-memory columnar dataframe engine
//!
//! Tables are built from named nullable columns and queried through
//! [`LazyFrame`], which records a [`LogicalPlan`](planner::LogicalPlan),
//! optimizes it, and materializes it with a [`QueryExecutor`]. Chains of
//! row-local steps can be fused and evaluated chunk-parallel.

pub mod error;
pub mod executor;
pub mod expr;
pub mod planner;
pub mod storage;
pub mod types;

pub use error::{ColflowError, Result};
pub use executor::{ExecutorConfig, QueryExecutor};
pub use expr::{col, lit, null, AggregateFunction, BinaryOp, Expr, UnaryOp};
pub use planner::{JoinType, LazyFrame, LazyGroupBy, SortExpr};
pub use storage::{Column, MemoryPool, Table};
pub use types::{DataType, Value};
