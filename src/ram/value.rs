//! # RAM Value and Tuple
//!
//! `ram::Value` is the tagged machine word all RAM expressions and LVM
//! opcodes operate on -- distinct from `crate::value::Value`, the richer
//! typed-column enum the storage layer uses. The two meet at the
//! `Project`/`Load`/`Store` seam via `from_storage`/`to_storage`, the same
//! role Souffle's `RamDomain` casts play in the original.

use crate::record_pool::RecordId;
use crate::symbol_table::SymbolId;
use crate::value::{DataType, Value as StorageValue};

/// A tagged machine word: the only thing RAM expressions, index patterns,
/// and LVM opcodes operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Int(i64),
    Uint(u64),
    /// Bit-laid float; compared/ordered on its raw bits (no `Ord` for `f64`
    /// otherwise), matching the "Value ... float (bit-laid into the same
    /// width)" data model note.
    Float(u64),
    Symbol(SymbolId),
    RecordId(RecordId),
}

impl Value {
    pub fn float(f: f64) -> Self {
        Value::Float(f.to_bits())
    }

    pub fn as_float(self) -> Option<f64> {
        match self {
            Value::Float(bits) => Some(f64::from_bits(bits)),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    /// Lower a storage-layer typed value into a machine word at a
    /// `Project`/`Store` boundary, interning strings into `table`.
    pub fn from_storage(v: &StorageValue, table: &crate::symbol_table::SymbolTable) -> Self {
        match v {
            StorageValue::Int32(i) => Value::Int(i64::from(*i)),
            StorageValue::Int64(i) => Value::Int(*i),
            StorageValue::Float64(f) => Value::float(*f),
            StorageValue::Bool(b) => Value::Int(i64::from(*b)),
            StorageValue::String(s) => Value::Symbol(table.intern(s)),
            StorageValue::Timestamp(t) => Value::Int(*t),
            StorageValue::Null => Value::Int(0),
            StorageValue::Vector(_) | StorageValue::VectorInt8(_) => {
                // Vectors are not representable as a single machine word;
                // the RAM/LVM core operates over scalar columns only, per
                // the RAM IR's "Values are machine-word integers" scope.
                Value::Int(0)
            }
        }
    }

    /// Lift a machine word back to a typed storage value at a `Load`
    /// boundary, given the expected column type.
    pub fn to_storage(self, expected: DataType, table: &crate::symbol_table::SymbolTable) -> StorageValue {
        match (self, expected) {
            (Value::Int(i), DataType::Int32) => StorageValue::Int32(i as i32),
            (Value::Int(i), DataType::Int64) => StorageValue::Int64(i),
            (Value::Int(i), DataType::Bool) => StorageValue::Bool(i != 0),
            (Value::Int(i), DataType::Timestamp) => StorageValue::Timestamp(i),
            (Value::Float(bits), _) => StorageValue::Float64(f64::from_bits(bits)),
            (Value::Symbol(id), DataType::String) => {
                StorageValue::String(table.try_resolve(id).unwrap_or_default().into())
            }
            (Value::Int(i), _) => StorageValue::Int64(i),
            (other, _) => StorageValue::Int64(other.as_int().unwrap_or_default()),
        }
    }
}

/// A fixed-arity ordered sequence of machine words, compared
/// lexicographically on their fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tuple(pub Vec<Value>);

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Tuple(values)
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, idx: usize) -> Option<Value> {
        self.0.get(idx).copied()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }
}

impl std::ops::Index<usize> for Tuple {
    type Output = Value;
    fn index(&self, idx: usize) -> &Value {
        &self.0[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuples_are_ordered_lexicographically() {
        let a = Tuple::new(vec![Value::Int(1), Value::Int(5)]);
        let b = Tuple::new(vec![Value::Int(1), Value::Int(9)]);
        let c = Tuple::new(vec![Value::Int(2), Value::Int(0)]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn float_values_compare_on_bit_pattern() {
        let a = Value::float(1.0);
        let b = Value::float(2.0);
        assert!(a < b);
    }

    #[test]
    fn storage_round_trip_for_ints() {
        let table = crate::symbol_table::SymbolTable::new();
        let sv = StorageValue::Int64(42);
        let rv = Value::from_storage(&sv, &table);
        assert_eq!(rv.to_storage(DataType::Int64, &table), sv);
    }

    #[test]
    fn storage_round_trip_for_strings_interns_once() {
        let table = crate::symbol_table::SymbolTable::new();
        let sv = StorageValue::string("hello");
        let rv = Value::from_storage(&sv, &table);
        assert!(matches!(rv, Value::Symbol(_)));
        assert_eq!(rv.to_storage(DataType::String, &table), sv);
    }
}
