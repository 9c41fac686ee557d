//! Expression trees used by filters, projections and aggregations.
//!
//! Expressions are immutable values built with [`col`], [`lit`] and the
//! combinator methods on [`Expr`]:
//!
//! ```
//! use colflow::expr::{col, lit};
//!
//! let predicate = col("age").gt(lit(30)).and(col("city").is_not_null());
//! assert_eq!(predicate.to_string(), "((age > 30) AND city IS NOT NULL)");
//! ```
//!
//! Operator names coming from a host layer are parsed with `FromStr`, so an
//! unknown operator is rejected while the plan is being built, not while it
//! runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ColflowError;
use crate::types::Value;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    /// Returns the symbol used when displaying this operator.
    #[must_use]
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

impl FromStr for BinaryOp {
    type Err = ColflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "+" | "add" => Ok(BinaryOp::Add),
            "-" | "sub" | "subtract" => Ok(BinaryOp::Subtract),
            "*" | "mul" | "multiply" => Ok(BinaryOp::Multiply),
            "/" | "div" | "divide" => Ok(BinaryOp::Divide),
            "%" | "mod" | "modulo" => Ok(BinaryOp::Modulo),
            "=" | "==" | "eq" => Ok(BinaryOp::Eq),
            "!=" | "<>" | "ne" | "neq" => Ok(BinaryOp::NotEq),
            "<" | "lt" => Ok(BinaryOp::Lt),
            "<=" | "le" | "lt_eq" => Ok(BinaryOp::LtEq),
            ">" | "gt" => Ok(BinaryOp::Gt),
            ">=" | "ge" | "gt_eq" => Ok(BinaryOp::GtEq),
            "and" | "&&" => Ok(BinaryOp::And),
            "or" | "||" => Ok(BinaryOp::Or),
            _ => Err(ColflowError::UnsupportedOperation(format!(
                "Unknown binary operator '{s}'"
            ))),
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

impl FromStr for UnaryOp {
    type Err = ColflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "not" | "!" => Ok(UnaryOp::Not),
            "-" | "neg" | "negate" => Ok(UnaryOp::Negate),
            "is_null" | "is null" => Ok(UnaryOp::IsNull),
            "is_not_null" | "is not null" => Ok(UnaryOp::IsNotNull),
            _ => Err(ColflowError::UnsupportedOperation(format!(
                "Unknown unary operator '{s}'"
            ))),
        }
    }
}

/// Aggregate functions available to group-by and pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Sum,
    Mean,
    Count,
    Min,
    Max,
    Median,
    /// Sample standard deviation.
    Std,
}

impl AggregateFunction {
    /// Returns the lowercase name used in derived column names.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Mean => "mean",
            AggregateFunction::Count => "count",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Median => "median",
            AggregateFunction::Std => "std",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggregateFunction {
    type Err = ColflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(AggregateFunction::Sum),
            "mean" | "avg" => Ok(AggregateFunction::Mean),
            "count" => Ok(AggregateFunction::Count),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            "median" => Ok(AggregateFunction::Median),
            "std" | "std_dev" | "stddev" => Ok(AggregateFunction::Std),
            _ => Err(ColflowError::UnsupportedOperation(format!(
                "Unknown aggregate function '{s}'"
            ))),
        }
    }
}

/// An expression over the columns of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A constant broadcast to every row.
    Literal(Value),
    /// A reference to a column by name.
    Column(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// Only meaningful inside an aggregate or pivot node.
    Aggregate {
        func: AggregateFunction,
        input: Box<Expr>,
    },
}

/// References a column by name.
#[must_use]
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// Builds a literal.
#[must_use]
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

/// Builds a null literal.
#[must_use]
pub fn null() -> Expr {
    Expr::Literal(Value::Null)
}

impl Expr {
    /// Builds a binary expression.
    #[must_use]
    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Builds a unary expression.
    #[must_use]
    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Builds an aggregate expression.
    #[must_use]
    pub fn aggregate(func: AggregateFunction, input: Expr) -> Expr {
        Expr::Aggregate {
            func,
            input: Box::new(input),
        }
    }

    #[must_use]
    pub fn equals(self, other: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Eq, other)
    }

    #[must_use]
    pub fn not_equals(self, other: Expr) -> Expr {
        Expr::binary(self, BinaryOp::NotEq, other)
    }

    #[must_use]
    pub fn lt(self, other: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Lt, other)
    }

    #[must_use]
    pub fn lt_eq(self, other: Expr) -> Expr {
        Expr::binary(self, BinaryOp::LtEq, other)
    }

    #[must_use]
    pub fn gt(self, other: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Gt, other)
    }

    #[must_use]
    pub fn gt_eq(self, other: Expr) -> Expr {
        Expr::binary(self, BinaryOp::GtEq, other)
    }

    #[must_use]
    pub fn and(self, other: Expr) -> Expr {
        Expr::binary(self, BinaryOp::And, other)
    }

    #[must_use]
    pub fn or(self, other: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Or, other)
    }

    #[must_use]
    pub fn is_null(self) -> Expr {
        Expr::unary(UnaryOp::IsNull, self)
    }

    #[must_use]
    pub fn is_not_null(self) -> Expr {
        Expr::unary(UnaryOp::IsNotNull, self)
    }

    #[must_use]
    pub fn sum(self) -> Expr {
        Expr::aggregate(AggregateFunction::Sum, self)
    }

    #[must_use]
    pub fn mean(self) -> Expr {
        Expr::aggregate(AggregateFunction::Mean, self)
    }

    #[must_use]
    pub fn count(self) -> Expr {
        Expr::aggregate(AggregateFunction::Count, self)
    }

    #[must_use]
    pub fn min(self) -> Expr {
        Expr::aggregate(AggregateFunction::Min, self)
    }

    #[must_use]
    pub fn max(self) -> Expr {
        Expr::aggregate(AggregateFunction::Max, self)
    }

    #[must_use]
    pub fn median(self) -> Expr {
        Expr::aggregate(AggregateFunction::Median, self)
    }

    #[must_use]
    pub fn std(self) -> Expr {
        Expr::aggregate(AggregateFunction::Std, self)
    }

    /// Returns true if this expression is the literal `true`.
    #[must_use]
    pub fn is_true_literal(&self) -> bool {
        matches!(self, Expr::Literal(Value::Boolean(true)))
    }

    /// Returns true if this expression is a bare null literal.
    #[must_use]
    pub fn is_null_literal(&self) -> bool {
        matches!(self, Expr::Literal(Value::Null))
    }

    /// Returns the name a projection of this expression gets by default.
    ///
    /// Columns keep their name, aggregates become `{input}_{func}`, anything
    /// else uses its display form.
    #[must_use]
    pub fn output_name(&self) -> String {
        match self {
            Expr::Column(name) => name.clone(),
            Expr::Aggregate { func, input } => format!("{}_{}", input.output_name(), func.name()),
            other => other.to_string(),
        }
    }

    /// Collects the names of all referenced columns, in first-seen order.
    #[must_use]
    pub fn referenced_columns(&self) -> Vec<&str> {
        fn walk<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
            match expr {
                Expr::Literal(_) => {}
                Expr::Column(name) => {
                    if !out.contains(&name.as_str()) {
                        out.push(name);
                    }
                }
                Expr::Unary { operand, .. } => walk(operand, out),
                Expr::Binary { left, right, .. } => {
                    walk(left, out);
                    walk(right, out);
                }
                Expr::Aggregate { input, .. } => walk(input, out),
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }
}

macro_rules! impl_arith_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary(self, $op, rhs)
            }
        }
    };
}

impl_arith_op!(Add, add, BinaryOp::Add);
impl_arith_op!(Sub, sub, BinaryOp::Subtract);
impl_arith_op!(Mul, mul, BinaryOp::Multiply);
impl_arith_op!(Div, div, BinaryOp::Divide);
impl_arith_op!(Rem, rem, BinaryOp::Modulo);

impl std::ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Negate, self)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::unary(UnaryOp::Not, self)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => write!(f, "'{s}'"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Column(name) => f.write_str(name),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {operand}"),
                UnaryOp::Negate => write!(f, "-{operand}"),
                UnaryOp::IsNull => write!(f, "{operand} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{operand} IS NOT NULL"),
            },
            Expr::Binary { left, op, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Aggregate { func, input } => write!(f, "{func}({input})"),
        }
    }
}
