//! # Relation iterators
//!
//! An iterator snapshots its relation's matching rows at creation time
//! (`IterScan`/`IterIndexScan`) and walks the snapshot with a cursor. This
//! sidesteps standard-library iterator-invalidation rules when the body of
//! the loop inserts into the very relation being scanned (a derived tuple
//! landing back in its own scan), which the semi-naive rewrite relies on
//! relations staying well-defined across a single pass.

use crate::ram::value::Tuple;

pub struct RelIter {
    rows: Vec<Tuple>,
    pos: usize,
}

impl RelIter {
    pub fn new(rows: Vec<Tuple>) -> Self {
        RelIter { rows, pos: 0 }
    }

    pub fn not_at_end(&self) -> bool {
        self.pos < self.rows.len()
    }

    pub fn current(&self) -> &Tuple {
        &self.rows[self.pos]
    }

    pub fn advance(&mut self) {
        self.pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::value::Value;

    #[test]
    fn walks_snapshot_in_order() {
        let rows = vec![
            Tuple::new(vec![Value::Int(1)]),
            Tuple::new(vec![Value::Int(2)]),
        ];
        let mut it = RelIter::new(rows);
        assert!(it.not_at_end());
        assert_eq!(it.current(), &Tuple::new(vec![Value::Int(1)]));
        it.advance();
        assert_eq!(it.current(), &Tuple::new(vec![Value::Int(2)]));
        it.advance();
        assert!(!it.not_at_end());
    }
}
