//! Type system for colflow.

mod value;

pub use value::{DataType, Value};
