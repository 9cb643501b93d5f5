//! # Value Type System
//!
//! Core value types: Int32, Int64, Float64, String, Bool, Null, Vector, VectorInt8, Timestamp.
//! Arbitrary arity tuples with Arrow-compatible types, used by the storage layer and by the
//! `IoDirective` boundary that feeds and drains LVM relations.
//!
//! ## Usage
//!
//! ```rust
//! use flowlog::value::{Value, Tuple, TupleSchema, DataType};
//!
//! // Create a 3-tuple with mixed types
//! let tuple = Tuple::new(vec![
//!     Value::Int32(1),
//!     Value::String("hello".into()),
//!     Value::Float64(3.14),
//! ]);
//!
//! // Define a schema
//! let schema = TupleSchema::new(vec![
//!     ("id".to_string(), DataType::Int32),
//!     ("name".to_string(), DataType::String),
//!     ("score".to_string(), DataType::Float64),
//! ]);
//! ```

pub mod arrow_convert;

pub use arrow_convert::{
    infer_schema_from_tuples, record_batch_to_tuples, tuples_to_record_batch, ArrowConvertError,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Re-export Arrow's DataType for schema definitions
pub use arrow::datatypes::DataType as ArrowDataType;

/// Supported data types for Datalog values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int32,
    Int64,
    Float64,
    String,
    Bool,
    Null,
    Vector,
    VectorInt8,
    Timestamp,
}

/// A single storage-layer value. Distinct from `ram::Value`, the tagged
/// machine word the LVM operates on; a conversion boundary sits at
/// `Project`/`Load`/`Store` (see `ram::value`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(Arc<str>),
    Bool(bool),
    Null,
    /// Dense float vector, for similarity search columns.
    Vector(Vec<f32>),
    /// Quantized int8 vector.
    VectorInt8(Vec<i8>),
    /// Unix epoch milliseconds.
    Timestamp(i64),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::Float64(_) => DataType::Float64,
            Value::String(_) => DataType::String,
            Value::Bool(_) => DataType::Bool,
            Value::Null => DataType::Null,
            Value::Vector(_) => DataType::Vector,
            Value::VectorInt8(_) => DataType::VectorInt8,
            Value::Timestamp(_) => DataType::Timestamp,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Vector(a), Value::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Value::VectorInt8(a), Value::VectorInt8(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int32(i) => i.hash(state),
            Value::Int64(i) => i.hash(state),
            Value::Float64(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Null => {}
            Value::Vector(v) => {
                for x in v {
                    x.to_bits().hash(state);
                }
            }
            Value::VectorInt8(v) => v.hash(state),
            Value::Timestamp(t) => t.hash(state),
        }
    }
}

/// A fixed-arity row of values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple(Vec<Value>);

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Tuple(values)
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

/// Schema for one relation: an ordered list of (name, type) fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleSchema {
    fields: Vec<(String, DataType)>,
}

impl TupleSchema {
    pub fn new(fields: Vec<(String, DataType)>) -> Self {
        TupleSchema { fields }
    }

    /// Build a schema from column names only, defaulting every column to
    /// `Int32` (the Datalog engine's native domain before type inference runs).
    pub fn from_names(names: Vec<String>) -> Self {
        TupleSchema {
            fields: names.into_iter().map(|n| (n, DataType::Int32)).collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn field_type(&self, index: usize) -> Option<&DataType> {
        self.fields.get(index).map(|(_, t)| t)
    }

    /// Check that a tuple's arity and value types match this schema.
    pub fn validate(&self, tuple: &Tuple) -> Result<(), SchemaValidationError> {
        if tuple.arity() != self.arity() {
            return Err(SchemaValidationError::ArityMismatch {
                expected: self.arity(),
                found: tuple.arity(),
            });
        }
        for (i, (name, expected)) in self.fields.iter().enumerate() {
            let value = tuple.get(i).expect("checked arity above");
            if value.is_null() {
                continue;
            }
            let found = value.data_type();
            if found != *expected {
                return Err(SchemaValidationError::TypeMismatch {
                    field: name.clone(),
                    expected: *expected,
                    found,
                });
            }
        }
        Ok(())
    }
}

/// Errors raised while validating a tuple against a `TupleSchema`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaValidationError {
    #[error("expected {expected} fields, found {found}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("field `{field}` expected {expected:?}, found {found:?}")]
    TypeMismatch {
        field: String,
        expected: DataType,
        found: DataType,
    },
}
