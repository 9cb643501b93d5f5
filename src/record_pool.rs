//! # Record Pool
//!
//! Append-only mapping integer -> packed tuple, consumed by
//! `PackRecord`/`UnpackRecord`. Records with identical field sequences are
//! hash-consed to a single id, matching spec.md's "Record Pool" data-model
//! entry.

use crate::ram::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An id into the `RecordPool`, stored inline in a `Value::RecordId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u32);

#[derive(Default)]
struct Inner {
    records: Vec<Vec<Value>>,
    lookup: HashMap<Vec<Value>, RecordId>,
}

/// Append-only, hash-consed store of packed records.
#[derive(Default)]
pub struct RecordPool {
    inner: RwLock<Inner>,
}

impl RecordPool {
    pub fn new() -> Self {
        RecordPool::default()
    }

    /// Pack `fields` into a record, returning the id of an existing
    /// identical record if one was already packed.
    pub fn pack(&self, fields: Vec<Value>) -> RecordId {
        if let Some(&id) = self.inner.read().lookup.get(&fields) {
            return id;
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.lookup.get(&fields) {
            return id;
        }
        let id = RecordId(inner.records.len() as u32);
        inner.records.push(fields.clone());
        inner.lookup.insert(fields, id);
        id
    }

    /// Unpack a record back into its field sequence.
    pub fn unpack(&self, id: RecordId) -> Vec<Value> {
        self.inner.read().records[id.0 as usize].clone()
    }

    pub fn try_unpack(&self, id: RecordId) -> Option<Vec<Value>> {
        self.inner.read().records.get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_field_sequences_share_an_id() {
        let pool = RecordPool::new();
        let a = pool.pack(vec![Value::Int(1), Value::Int(2)]);
        let b = pool.pack(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinct_field_sequences_get_distinct_ids() {
        let pool = RecordPool::new();
        let a = pool.pack(vec![Value::Int(1)]);
        let b = pool.pack(vec![Value::Int(2)]);
        assert_ne!(a, b);
    }

    #[test]
    fn unpack_round_trips() {
        let pool = RecordPool::new();
        let fields = vec![Value::Int(7), Value::Int(9)];
        let id = pool.pack(fields.clone());
        assert_eq!(pool.unpack(id), fields);
    }
}
