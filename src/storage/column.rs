//! Typed, nullable columnar storage.

use crate::error::{ColflowError, Result};
use crate::types::{DataType, Value};

/// A typed column of nullable cells.
///
/// Columns are immutable once built: every operator that transforms a
/// column returns a new one. Tables share columns through `Arc<Column>`.
#[derive(Debug, Clone)]
pub enum Column {
    /// 64-bit signed integers.
    Integer(Vec<Option<i64>>),
    /// 64-bit floats.
    Float(Vec<Option<f64>>),
    /// UTF-8 strings.
    String(Vec<Option<String>>),
    /// Booleans.
    Boolean(Vec<Option<bool>>),
}

/// Applies the same expression to the cells of whichever variant is present.
macro_rules! map_cells {
    ($column:expr, $cells:ident => $body:expr) => {
        match $column {
            Column::Integer($cells) => Column::Integer($body),
            Column::Float($cells) => Column::Float($body),
            Column::String($cells) => Column::String($body),
            Column::Boolean($cells) => Column::Boolean($body),
        }
    };
}

impl Column {
    /// Creates an all-null column of the given type.
    #[must_use]
    pub fn nulls(data_type: DataType, len: usize) -> Self {
        match data_type {
            DataType::Integer => Column::Integer(vec![None; len]),
            DataType::Float => Column::Float(vec![None; len]),
            DataType::String => Column::String(vec![None; len]),
            DataType::Boolean => Column::Boolean(vec![None; len]),
        }
    }

    /// Builds a column of `data_type` from dynamically typed values.
    ///
    /// Integers are accepted into float columns; any other kind mismatch
    /// fails with [`ColflowError::TypeMismatch`].
    #[allow(clippy::cast_precision_loss)]
    pub fn from_values(data_type: DataType, values: Vec<Value>) -> Result<Self> {
        fn mismatch(data_type: DataType, value: &Value) -> ColflowError {
            ColflowError::type_mismatch(
                data_type.name(),
                value.data_type().map_or("NULL", |t| t.name()),
            )
        }

        match data_type {
            DataType::Integer => values
                .into_iter()
                .map(|v| match v {
                    Value::Integer(i) => Ok(Some(i)),
                    Value::Null => Ok(None),
                    other => Err(mismatch(data_type, &other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(Column::Integer),
            DataType::Float => values
                .into_iter()
                .map(|v| match v {
                    Value::Float(f) => Ok(Some(f)),
                    Value::Integer(i) => Ok(Some(i as f64)),
                    Value::Null => Ok(None),
                    other => Err(mismatch(data_type, &other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(Column::Float),
            DataType::String => values
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(Some(s)),
                    Value::Null => Ok(None),
                    other => Err(mismatch(data_type, &other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(Column::String),
            DataType::Boolean => values
                .into_iter()
                .map(|v| match v {
                    Value::Boolean(b) => Ok(Some(b)),
                    Value::Null => Ok(None),
                    other => Err(mismatch(data_type, &other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(Column::Boolean),
        }
    }

    /// Returns the element kind of this column.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Column::Integer(_) => DataType::Integer,
            Column::Float(_) => DataType::Float,
            Column::String(_) => DataType::String,
            Column::Boolean(_) => DataType::Boolean,
        }
    }

    /// Returns the number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Column::Integer(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::String(v) => v.len(),
            Column::Boolean(v) => v.len(),
        }
    }

    /// Returns true if the column has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets the value at `row`, or None if `row` is out of bounds.
    #[must_use]
    pub fn get(&self, row: usize) -> Option<Value> {
        match self {
            Column::Integer(v) => v.get(row).map(|c| c.map_or(Value::Null, Value::Integer)),
            Column::Float(v) => v.get(row).map(|c| c.map_or(Value::Null, Value::Float)),
            Column::String(v) => v
                .get(row)
                .map(|c| c.as_ref().map_or(Value::Null, |s| Value::String(s.clone()))),
            Column::Boolean(v) => v.get(row).map(|c| c.map_or(Value::Null, Value::Boolean)),
        }
    }

    /// Returns true if the cell at `row` exists and is null.
    #[must_use]
    pub fn is_null(&self, row: usize) -> bool {
        match self {
            Column::Integer(v) => matches!(v.get(row), Some(None)),
            Column::Float(v) => matches!(v.get(row), Some(None)),
            Column::String(v) => matches!(v.get(row), Some(None)),
            Column::Boolean(v) => matches!(v.get(row), Some(None)),
        }
    }

    /// Returns the number of null cells.
    #[must_use]
    pub fn null_count(&self) -> usize {
        match self {
            Column::Integer(v) => v.iter().filter(|c| c.is_none()).count(),
            Column::Float(v) => v.iter().filter(|c| c.is_none()).count(),
            Column::String(v) => v.iter().filter(|c| c.is_none()).count(),
            Column::Boolean(v) => v.iter().filter(|c| c.is_none()).count(),
        }
    }

    /// Iterates over the cells as dynamically typed values.
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len()).map(|row| self.get(row).unwrap_or(Value::Null))
    }

    /// Gathers the cells at `indices`, in order.
    ///
    /// # Panics
    ///
    /// Panics if an index is out of bounds; callers produce indices from
    /// this column's own row range.
    #[must_use]
    pub fn take(&self, indices: &[usize]) -> Self {
        map_cells!(self, cells => indices.iter().map(|&i| cells[i].clone()).collect())
    }

    /// Gathers cells, emitting null wherever the index is `None`.
    #[must_use]
    pub fn take_optional(&self, indices: &[Option<usize>]) -> Self {
        map_cells!(self, cells => indices
            .iter()
            .map(|idx| idx.and_then(|i| cells[i].clone()))
            .collect())
    }

    /// Copies out `len` cells starting at `offset`, clamped to the column.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        let start = offset.min(self.len());
        let end = start.saturating_add(len).min(self.len());
        map_cells!(self, cells => cells[start..end].to_vec())
    }

    /// Keeps the cells whose mask entry is true; a null mask cell drops the row.
    pub fn filter(&self, mask: &Column) -> Result<Self> {
        let Column::Boolean(bits) = mask else {
            return Err(ColflowError::type_mismatch(
                DataType::Boolean.name(),
                mask.data_type().name(),
            ));
        };
        if bits.len() != self.len() {
            return Err(ColflowError::ShapeError(format!(
                "Mask has {} rows, column has {}",
                bits.len(),
                self.len()
            )));
        }
        let keep: Vec<usize> = bits
            .iter()
            .enumerate()
            .filter_map(|(i, b)| (*b == Some(true)).then_some(i))
            .collect();
        Ok(self.take(&keep))
    }

    /// Concatenates same-kind columns in order.
    pub fn concat(parts: &[&Column]) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Err(ColflowError::ShapeError(
                "Cannot concatenate zero columns".into(),
            ));
        };
        let data_type = first.data_type();
        let total = parts.iter().map(|c| c.len()).sum();

        macro_rules! concat_variant {
            ($variant:ident) => {{
                let mut out = Vec::with_capacity(total);
                for part in parts {
                    match part {
                        Column::$variant(cells) => out.extend(cells.iter().cloned()),
                        other => {
                            return Err(ColflowError::type_mismatch(
                                data_type.name(),
                                other.data_type().name(),
                            ))
                        }
                    }
                }
                Column::$variant(out)
            }};
        }

        Ok(match data_type {
            DataType::Integer => concat_variant!(Integer),
            DataType::Float => concat_variant!(Float),
            DataType::String => concat_variant!(String),
            DataType::Boolean => concat_variant!(Boolean),
        })
    }

    /// Returns the integer cells, if this is an integer column.
    #[must_use]
    pub fn as_integer(&self) -> Option<&[Option<i64>]> {
        match self {
            Column::Integer(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the float cells, if this is a float column.
    #[must_use]
    pub fn as_float(&self) -> Option<&[Option<f64>]> {
        match self {
            Column::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the string cells, if this is a string column.
    #[must_use]
    pub fn as_string(&self) -> Option<&[Option<String>]> {
        match self {
            Column::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the boolean cells, if this is a boolean column.
    #[must_use]
    pub fn as_boolean(&self) -> Option<&[Option<bool>]> {
        match self {
            Column::Boolean(v) => Some(v),
            _ => None,
        }
    }
}

// Floats compare by exact bit pattern: fused and unfused results must match bit for bit
impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Column::Integer(a), Column::Integer(b)) => a == b,
            (Column::Float(a), Column::Float(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(x, y)| x.map(f64::to_bits) == y.map(f64::to_bits))
            }
            (Column::String(a), Column::String(b)) => a == b,
            (Column::Boolean(a), Column::Boolean(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Vec<Option<i64>>> for Column {
    fn from(v: Vec<Option<i64>>) -> Self {
        Column::Integer(v)
    }
}

impl From<Vec<i64>> for Column {
    fn from(v: Vec<i64>) -> Self {
        Column::Integer(v.into_iter().map(Some).collect())
    }
}

impl From<Vec<Option<f64>>> for Column {
    fn from(v: Vec<Option<f64>>) -> Self {
        Column::Float(v)
    }
}

impl From<Vec<f64>> for Column {
    fn from(v: Vec<f64>) -> Self {
        Column::Float(v.into_iter().map(Some).collect())
    }
}

impl From<Vec<Option<bool>>> for Column {
    fn from(v: Vec<Option<bool>>) -> Self {
        Column::Boolean(v)
    }
}

impl From<Vec<bool>> for Column {
    fn from(v: Vec<bool>) -> Self {
        Column::Boolean(v.into_iter().map(Some).collect())
    }
}

impl From<Vec<Option<String>>> for Column {
    fn from(v: Vec<Option<String>>) -> Self {
        Column::String(v)
    }
}

impl From<Vec<Option<&str>>> for Column {
    fn from(v: Vec<Option<&str>>) -> Self {
        Column::String(v.into_iter().map(|s| s.map(str::to_string)).collect())
    }
}

impl From<Vec<&str>> for Column {
    fn from(v: Vec<&str>) -> Self {
        Column::String(v.into_iter().map(|s| Some(s.to_string())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_nulls() {
        let col = Column::from(vec![Some(1i64), None, Some(3)]);
        assert_eq!(col.len(), 3);
        assert_eq!(col.get(0), Some(Value::Integer(1)));
        assert_eq!(col.get(1), Some(Value::Null));
        assert_eq!(col.get(3), None);
        assert!(col.is_null(1));
        assert!(!col.is_null(0));
        assert!(!col.is_null(10));
        assert_eq!(col.null_count(), 1);
    }

    #[test]
    fn test_from_values_promotes_integers_into_float() {
        let col = Column::from_values(
            DataType::Float,
            vec![Value::Integer(2), Value::Null, Value::Float(0.5)],
        )
        .unwrap();
        assert_eq!(col, Column::from(vec![Some(2.0), None, Some(0.5)]));
    }

    #[test]
    fn test_from_values_rejects_wrong_kind() {
        let err = Column::from_values(DataType::Integer, vec![Value::String("x".into())])
            .unwrap_err();
        assert!(matches!(err, ColflowError::TypeMismatch { .. }));
    }

    #[test]
    fn test_take_optional_fills_nulls() {
        let col = Column::from(vec!["a", "b"]);
        let taken = col.take_optional(&[Some(1), None, Some(0)]);
        assert_eq!(taken, Column::from(vec![Some("b"), None, Some("a")]));
    }

    #[test]
    fn test_slice_is_clamped() {
        let col = Column::from(vec![1i64, 2, 3]);
        assert_eq!(col.slice(1, 10), Column::from(vec![2i64, 3]));
        assert!(col.slice(5, 2).is_empty());
    }

    #[test]
    fn test_concat_rejects_mixed_kinds() {
        let a = Column::from(vec![1i64]);
        let b = Column::from(vec![true]);
        assert!(Column::concat(&[&a, &b]).is_err());
        let c = Column::from(vec![Some(2i64), None]);
        assert_eq!(
            Column::concat(&[&a, &c]).unwrap(),
            Column::from(vec![Some(1i64), Some(2), None])
        );
    }

    #[test]
    fn test_filter_drops_null_mask_cells() {
        let col = Column::from(vec![1i64, 2, 3]);
        let mask = Column::from(vec![Some(true), None, Some(false)]);
        assert_eq!(col.filter(&mask).unwrap(), Column::from(vec![1i64]));
        assert!(col.filter(&Column::from(vec![1i64, 2, 3])).is_err());
    }

    #[test]
    fn test_float_equality_is_bitwise() {
        let a = Column::from(vec![f64::NAN]);
        assert_eq!(a, a.clone());
        assert_ne!(Column::from(vec![0.0]), Column::from(vec![-0.0]));
    }
}
