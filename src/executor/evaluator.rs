//! Column-at-a-time expression evaluator.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{ColflowError, Result};
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::storage::{Column, Table};
use crate::types::{DataType, Value};

/// Evaluates expressions against whole tables.
///
/// Column references are zero-copy; every other node produces a new column
/// with one cell per input row.
pub struct Evaluator;

impl Evaluator {
    /// Evaluates `expr` over every row of `table`.
    ///
    /// # Errors
    ///
    /// - `SchemaError` when a referenced column does not exist
    /// - `TypeMismatch` when operand kinds do not fit the operator
    /// - `DivisionByZero` / `ArithmeticOverflow` from integer arithmetic
    /// - `UnsupportedOperation` for aggregate expressions
    pub fn evaluate(expr: &Expr, table: &Table) -> Result<Arc<Column>> {
        let len = table.num_rows();
        match expr {
            Expr::Literal(value) => Ok(Arc::new(Self::create_literal_column(value, len))),
            Expr::Column(name) => table.column(name).cloned(),
            // NOT of an untyped null is a null boolean
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } if operand.is_null_literal() => Ok(Arc::new(Column::nulls(DataType::Boolean, len))),
            Expr::Unary { op, operand } => {
                let input = Self::evaluate(operand, table)?;
                Self::unary(*op, &input).map(Arc::new)
            }
            Expr::Binary { left, op, right } => {
                // A bare null literal takes the kind of the other side
                let (lhs, rhs) = match (left.as_ref(), right.as_ref()) {
                    (Expr::Literal(Value::Null), other) => {
                        let rhs = Self::evaluate(other, table)?;
                        (Arc::new(Column::nulls(rhs.data_type(), len)), rhs)
                    }
                    (other, Expr::Literal(Value::Null)) => {
                        let lhs = Self::evaluate(other, table)?;
                        let rhs = Arc::new(Column::nulls(lhs.data_type(), len));
                        (lhs, rhs)
                    }
                    _ => (Self::evaluate(left, table)?, Self::evaluate(right, table)?),
                };
                Self::binary(&lhs, *op, &rhs).map(Arc::new)
            }
            Expr::Aggregate { func, .. } => Err(ColflowError::UnsupportedOperation(format!(
                "Aggregate '{func}' cannot be evaluated row by row"
            ))),
        }
    }

    /// Evaluates a filter predicate; a bare null literal is a null boolean.
    ///
    /// # Errors
    ///
    /// Same as [`Evaluator::evaluate`].
    pub fn evaluate_predicate(predicate: &Expr, table: &Table) -> Result<Arc<Column>> {
        if predicate.is_null_literal() {
            return Ok(Arc::new(Column::nulls(DataType::Boolean, table.num_rows())));
        }
        Self::evaluate(predicate, table)
    }

    /// Evaluates `expr` over `len` rows of `table` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`Evaluator::evaluate`].
    pub fn evaluate_range(
        expr: &Expr,
        table: &Table,
        offset: usize,
        len: usize,
    ) -> Result<Arc<Column>> {
        Self::evaluate(expr, &table.slice(offset, len))
    }

    /// Broadcasts a literal; a null literal alone becomes an integer column.
    fn create_literal_column(value: &Value, len: usize) -> Column {
        match value {
            Value::Integer(v) => Column::Integer(vec![Some(*v); len]),
            Value::Float(v) => Column::Float(vec![Some(*v); len]),
            Value::String(v) => Column::String(vec![Some(v.clone()); len]),
            Value::Boolean(v) => Column::Boolean(vec![Some(*v); len]),
            Value::Null => Column::nulls(DataType::Integer, len),
        }
    }

    fn unary(op: UnaryOp, input: &Column) -> Result<Column> {
        match op {
            UnaryOp::Not => match input {
                Column::Boolean(cells) => Ok(Column::Boolean(
                    cells.iter().map(|c| c.map(|b| !b)).collect(),
                )),
                other => Err(ColflowError::type_mismatch(
                    "BOOLEAN operand for NOT",
                    other.data_type().name(),
                )),
            },
            UnaryOp::Negate => match input {
                Column::Integer(cells) => cells
                    .iter()
                    .map(|c| {
                        c.map(|v| {
                            v.checked_neg().ok_or_else(|| {
                                ColflowError::ArithmeticOverflow(format!("-({v})"))
                            })
                        })
                        .transpose()
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Column::Integer),
                Column::Float(cells) => {
                    Ok(Column::Float(cells.iter().map(|c| c.map(|v| -v)).collect()))
                }
                other => Err(ColflowError::type_mismatch(
                    "numeric operand for negation",
                    other.data_type().name(),
                )),
            },
            UnaryOp::IsNull => Ok(Self::null_mask(input, true)),
            UnaryOp::IsNotNull => Ok(Self::null_mask(input, false)),
        }
    }

    fn null_mask(input: &Column, want_null: bool) -> Column {
        Column::Boolean(
            (0..input.len())
                .map(|i| Some(input.is_null(i) == want_null))
                .collect(),
        )
    }

    fn binary(left: &Column, op: BinaryOp, right: &Column) -> Result<Column> {
        match op {
            BinaryOp::Add => Self::arithmetic(left, Arith::Add, right),
            BinaryOp::Subtract => Self::arithmetic(left, Arith::Sub, right),
            BinaryOp::Multiply => Self::arithmetic(left, Arith::Mul, right),
            BinaryOp::Divide => Self::arithmetic(left, Arith::Div, right),
            BinaryOp::Modulo => Self::arithmetic(left, Arith::Rem, right),
            BinaryOp::Eq => Self::compare(left, Cmp::Eq, right),
            BinaryOp::NotEq => Self::compare(left, Cmp::NotEq, right),
            BinaryOp::Lt => Self::compare(left, Cmp::Lt, right),
            BinaryOp::LtEq => Self::compare(left, Cmp::LtEq, right),
            BinaryOp::Gt => Self::compare(left, Cmp::Gt, right),
            BinaryOp::GtEq => Self::compare(left, Cmp::GtEq, right),
            BinaryOp::And => Self::logical(left, true, right),
            BinaryOp::Or => Self::logical(left, false, right),
        }
    }

    fn arithmetic(left: &Column, op: Arith, right: &Column) -> Result<Column> {
        if let (Column::Integer(l), Column::Integer(r)) = (left, right) {
            return zip_try(l, r, |a, b| op.apply_int(a, b)).map(Column::Integer);
        }
        match (float_cells(left), float_cells(right)) {
            (Some(l), Some(r)) => Ok(Column::Float(zip_map(&l, &r, |a, b| op.apply_float(*a, *b)))),
            _ => Err(operand_mismatch("numeric operands", left, op.symbol(), right)),
        }
    }

    fn compare(left: &Column, op: Cmp, right: &Column) -> Result<Column> {
        let cells = match (left, right) {
            (Column::Integer(l), Column::Integer(r)) => zip_map(l, r, |a, b| op.holds(Some(a.cmp(b)))),
            (Column::String(l), Column::String(r)) => zip_map(l, r, |a, b| op.holds(Some(a.cmp(b)))),
            (Column::Boolean(l), Column::Boolean(r)) => zip_map(l, r, |a, b| op.holds(Some(a.cmp(b)))),
            _ => match (float_cells(left), float_cells(right)) {
                (Some(l), Some(r)) => zip_map(&l, &r, |a, b| op.holds(a.partial_cmp(b))),
                _ => {
                    return Err(operand_mismatch(
                        "comparable operands",
                        left,
                        op.symbol(),
                        right,
                    ))
                }
            },
        };
        Ok(Column::Boolean(cells))
    }

    /// Kleene AND (`is_and`) or OR over boolean columns.
    fn logical(left: &Column, is_and: bool, right: &Column) -> Result<Column> {
        let (Column::Boolean(l), Column::Boolean(r)) = (left, right) else {
            let symbol = if is_and { "AND" } else { "OR" };
            return Err(operand_mismatch("BOOLEAN operands", left, symbol, right));
        };
        let cells = l
            .iter()
            .zip(r)
            .map(|(a, b)| {
                if is_and {
                    match (a, b) {
                        (Some(false), _) | (_, Some(false)) => Some(false),
                        (Some(true), Some(true)) => Some(true),
                        _ => None,
                    }
                } else {
                    match (a, b) {
                        (Some(true), _) | (_, Some(true)) => Some(true),
                        (Some(false), Some(false)) => Some(false),
                        _ => None,
                    }
                }
            })
            .collect();
        Ok(Column::Boolean(cells))
    }
}

#[derive(Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Arith {
    fn symbol(self) -> &'static str {
        match self {
            Arith::Add => "+",
            Arith::Sub => "-",
            Arith::Mul => "*",
            Arith::Div => "/",
            Arith::Rem => "%",
        }
    }

    fn apply_int(self, a: i64, b: i64) -> Result<i64> {
        let result = match self {
            Arith::Add => a.checked_add(b),
            Arith::Sub => a.checked_sub(b),
            Arith::Mul => a.checked_mul(b),
            Arith::Div | Arith::Rem if b == 0 => return Err(ColflowError::DivisionByZero),
            Arith::Div => a.checked_div(b),
            Arith::Rem => a.checked_rem(b),
        };
        result.ok_or_else(|| {
            ColflowError::ArithmeticOverflow(format!("{a} {} {b}", self.symbol()))
        })
    }

    fn apply_float(self, a: f64, b: f64) -> f64 {
        match self {
            Arith::Add => a + b,
            Arith::Sub => a - b,
            Arith::Mul => a * b,
            Arith::Div => a / b,
            Arith::Rem => a % b,
        }
    }
}

#[derive(Clone, Copy)]
enum Cmp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl Cmp {
    fn symbol(self) -> &'static str {
        match self {
            Cmp::Eq => "=",
            Cmp::NotEq => "!=",
            Cmp::Lt => "<",
            Cmp::LtEq => "<=",
            Cmp::Gt => ">",
            Cmp::GtEq => ">=",
        }
    }

    /// `None` is an unordered float pair (NaN), which only satisfies `!=`.
    fn holds(self, ordering: Option<Ordering>) -> bool {
        match self {
            Cmp::Eq => ordering == Some(Ordering::Equal),
            Cmp::NotEq => ordering != Some(Ordering::Equal),
            Cmp::Lt => ordering == Some(Ordering::Less),
            Cmp::LtEq => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Cmp::Gt => ordering == Some(Ordering::Greater),
            Cmp::GtEq => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

/// Views a numeric column as floats, promoting integers.
#[allow(clippy::cast_precision_loss)]
fn float_cells(column: &Column) -> Option<Cow<'_, [Option<f64>]>> {
    match column {
        Column::Float(cells) => Some(Cow::Borrowed(cells)),
        Column::Integer(cells) => Some(Cow::Owned(
            cells.iter().map(|c| c.map(|v| v as f64)).collect(),
        )),
        Column::String(_) | Column::Boolean(_) => None,
    }
}

fn zip_map<A, B, T>(
    left: &[Option<A>],
    right: &[Option<B>],
    f: impl Fn(&A, &B) -> T,
) -> Vec<Option<T>> {
    left.iter()
        .zip(right)
        .map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => Some(f(a, b)),
            _ => None,
        })
        .collect()
}

fn zip_try<T>(
    left: &[Option<i64>],
    right: &[Option<i64>],
    f: impl Fn(i64, i64) -> Result<T>,
) -> Result<Vec<Option<T>>> {
    left.iter()
        .zip(right)
        .map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => f(*a, *b).map(Some),
            _ => Ok(None),
        })
        .collect()
}

fn operand_mismatch(expected: &str, left: &Column, symbol: &str, right: &Column) -> ColflowError {
    ColflowError::type_mismatch(
        expected,
        format!(
            "{} {symbol} {}",
            left.data_type().name(),
            right.data_type().name()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, lit, null};

    fn table() -> Table {
        Table::new(vec![
            ("a", Column::from(vec![Some(1i64), Some(2), None, Some(4)])),
            ("b", Column::from(vec![Some(0.5), None, Some(1.5), Some(2.0)])),
            ("s", Column::from(vec![Some("x"), Some("y"), None, Some("x")])),
            ("f", Column::from(vec![Some(true), Some(false), None, None])),
        ])
        .unwrap()
    }

    fn eval(expr: &Expr) -> Result<Column> {
        Evaluator::evaluate(expr, &table()).map(|c| c.as_ref().clone())
    }

    #[test]
    fn test_column_reference_is_shared() {
        let t = table();
        let out = Evaluator::evaluate(&col("a"), &t).unwrap();
        assert!(Arc::ptr_eq(&out, t.column("a").unwrap()));
    }

    #[test]
    fn test_integer_arithmetic_stays_integer() {
        let out = eval(&(col("a") * lit(3))).unwrap();
        assert_eq!(out, Column::from(vec![Some(3i64), Some(6), None, Some(12)]));
    }

    #[test]
    fn test_mixed_arithmetic_promotes() {
        let out = eval(&(col("a") + col("b"))).unwrap();
        assert_eq!(out, Column::from(vec![Some(1.5), None, None, Some(6.0)]));
    }

    #[test]
    fn test_integer_division_by_zero() {
        let err = eval(&(col("a") / lit(0))).unwrap_err();
        assert!(matches!(err, ColflowError::DivisionByZero));
        let err = eval(&(col("a") % lit(0))).unwrap_err();
        assert!(matches!(err, ColflowError::DivisionByZero));
    }

    #[test]
    fn test_float_division_by_zero_is_ieee() {
        let out = eval(&(col("b") / lit(0.0))).unwrap();
        let cells = out.as_float().unwrap();
        assert_eq!(cells[0], Some(f64::INFINITY));
        assert_eq!(cells[1], None);
    }

    #[test]
    fn test_overflow() {
        let err = eval(&(col("a") + lit(i64::MAX))).unwrap_err();
        assert!(matches!(err, ColflowError::ArithmeticOverflow(_)));
        let err = eval(&(-lit(i64::MIN))).unwrap_err();
        assert!(matches!(err, ColflowError::ArithmeticOverflow(_)));
    }

    #[test]
    fn test_comparisons_propagate_nulls() {
        let out = eval(&col("a").gt(lit(1.5))).unwrap();
        assert_eq!(out, Column::from(vec![Some(false), Some(true), None, Some(true)]));
        let out = eval(&col("s").equals(lit("x"))).unwrap();
        assert_eq!(out, Column::from(vec![Some(true), Some(false), None, Some(true)]));
    }

    #[test]
    fn test_nan_only_satisfies_not_equal() {
        let t = Table::new(vec![("n", Column::from(vec![f64::NAN]))]).unwrap();
        let eq = Evaluator::evaluate(&col("n").equals(col("n")), &t).unwrap();
        let ne = Evaluator::evaluate(&col("n").not_equals(col("n")), &t).unwrap();
        assert_eq!(eq.as_ref(), &Column::from(vec![false]));
        assert_eq!(ne.as_ref(), &Column::from(vec![true]));
    }

    #[test]
    fn test_kleene_logic() {
        let t = Table::new(vec![
            ("p", Column::from(vec![Some(true), Some(false), None, None, None])),
            ("q", Column::from(vec![None, None, Some(true), Some(false), None])),
        ])
        .unwrap();
        let and = Evaluator::evaluate(&col("p").and(col("q")), &t).unwrap();
        assert_eq!(
            and.as_ref(),
            &Column::from(vec![None, Some(false), None, Some(false), None])
        );
        let or = Evaluator::evaluate(&col("p").or(col("q")), &t).unwrap();
        assert_eq!(
            or.as_ref(),
            &Column::from(vec![Some(true), None, Some(true), None, None])
        );
    }

    #[test]
    fn test_is_null_never_null() {
        let out = eval(&col("f").is_null()).unwrap();
        assert_eq!(out, Column::from(vec![false, false, true, true]));
        let out = eval(&col("f").is_not_null()).unwrap();
        assert_eq!(out.null_count(), 0);
    }

    #[test]
    fn test_null_literal_adopts_other_kind() {
        let out = eval(&col("s").equals(null())).unwrap();
        assert_eq!(out, Column::from(vec![None::<bool>; 4]));
        let out = eval(&(col("b") + null())).unwrap();
        assert_eq!(out.data_type(), DataType::Float);
        let out = eval(&null()).unwrap();
        assert_eq!(out, Column::nulls(DataType::Integer, 4));
    }

    #[test]
    fn test_not_null_literal_is_null_boolean() {
        let out = eval(&!null()).unwrap();
        assert_eq!(out, Column::nulls(DataType::Boolean, 4));
        let out = eval(&!!null()).unwrap();
        assert_eq!(out, Column::nulls(DataType::Boolean, 4));
        // Kleene: false AND null is false, true AND null is null
        let out = eval(&col("a").gt(lit(1)).and(!null())).unwrap();
        assert_eq!(out, Column::from(vec![Some(false), None, None, None]));
    }

    #[test]
    fn test_null_predicate_is_null_boolean() {
        let out = Evaluator::evaluate_predicate(&null(), &table()).unwrap();
        assert_eq!(out.as_ref(), &Column::nulls(DataType::Boolean, 4));
    }

    #[test]
    fn test_type_errors() {
        assert!(matches!(
            eval(&(col("s") + lit(1))),
            Err(ColflowError::TypeMismatch { .. })
        ));
        assert!(matches!(
            eval(&col("a").and(col("f"))),
            Err(ColflowError::TypeMismatch { .. })
        ));
        assert!(matches!(
            eval(&col("s").lt(col("a"))),
            Err(ColflowError::TypeMismatch { .. })
        ));
        assert!(matches!(eval(&!col("a")), Err(ColflowError::TypeMismatch { .. })));
    }

    #[test]
    fn test_missing_column_and_aggregate() {
        assert!(matches!(eval(&col("zzz")), Err(ColflowError::SchemaError(_))));
        assert!(matches!(
            eval(&col("a").sum()),
            Err(ColflowError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_evaluate_range() {
        let out = Evaluator::evaluate_range(&(col("a") + lit(1)), &table(), 1, 2).unwrap();
        assert_eq!(out.as_ref(), &Column::from(vec![Some(3i64), None]));
    }
}
