//! # Relations and indexes
//!
//! A relation is a deduplicated set of fixed-arity tuples. The
//! canonical store is a `BTreeSet<Tuple>` (gives the full scan its stable,
//! lexicographic order for free -- load-bearing for `Parallel`'s
//! deterministic delta-merge, see `lvm::eval::parallel`). Index scans are
//! served by secondary `BTreeSet`s keyed on a column permutation: bound
//! columns first (in ascending column order), then the remaining columns,
//! so a bound prefix becomes a contiguous tree range.

use std::collections::{BTreeSet, HashMap};

use crate::ram::node::StorageKind;
use crate::ram::value::{Tuple, Value};
use crate::value::DataType;

/// Columns bound by a pattern, derived once from its `bound_mask` and
/// reused for every insert/remove/query against that index.
fn bound_columns(arity: usize, mask: u32) -> Vec<usize> {
    (0..arity).filter(|c| mask & (1 << c) != 0).collect()
}

fn permute(tuple: &[Value], bound_cols: &[usize], arity: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(arity);
    for &c in bound_cols {
        out.push(tuple[c]);
    }
    for c in 0..arity {
        if !bound_cols.contains(&c) {
            out.push(tuple[c]);
        }
    }
    out
}

/// Undo `permute`: given a permuted key and the bound-column list it was
/// built with, reconstruct the tuple in original column order.
fn unpermute(permuted: &[Value], bound_cols: &[usize], arity: usize) -> Tuple {
    let mut out = vec![Value::Int(0); arity];
    for (i, &c) in bound_cols.iter().enumerate() {
        out[c] = permuted[i];
    }
    let rest: Vec<usize> = (0..arity).filter(|c| !bound_cols.contains(c)).collect();
    for (i, &c) in rest.iter().enumerate() {
        out[c] = permuted[bound_cols.len() + i];
    }
    Tuple::new(out)
}

struct Index {
    bound_cols: Vec<usize>,
    tree: BTreeSet<Vec<Value>>,
}

impl Index {
    fn new(arity: usize, mask: u32) -> Self {
        Index {
            bound_cols: bound_columns(arity, mask),
            tree: BTreeSet::new(),
        }
    }

    fn insert(&mut self, arity: usize, tuple: &Tuple) {
        self.tree.insert(permute(tuple.as_slice(), &self.bound_cols, arity));
    }

    fn remove(&mut self, arity: usize, tuple: &Tuple) {
        self.tree.remove(&permute(tuple.as_slice(), &self.bound_cols, arity));
    }

    /// All tuples whose bound columns equal `bound_values` (in the pattern's
    /// column order, i.e. `bound_values[i]` is the value for `bound_cols[i]`).
    fn range(&self, arity: usize, bound_values: &[Value]) -> Vec<Tuple> {
        let lower: Vec<Value> = bound_values
            .iter()
            .copied()
            .chain(std::iter::repeat(Value::Int(i64::MIN)).take(arity - bound_values.len()))
            .collect();
        let upper: Vec<Value> = bound_values
            .iter()
            .copied()
            .chain(std::iter::repeat(Value::Int(i64::MAX)).take(arity - bound_values.len()))
            .collect();
        self.tree
            .range(lower..=upper)
            .filter(|k| k[..bound_values.len()] == bound_values[..])
            .map(|k| unpermute(k, &self.bound_cols, arity))
            .collect()
    }
}

pub struct Relation {
    pub name: String,
    pub arity: usize,
    pub storage_kind: StorageKind,
    pub attr_types: Vec<DataType>,
    rows: BTreeSet<Tuple>,
    indexes: HashMap<u32, Index>,
}

impl Relation {
    pub fn new(name: String, arity: usize, storage_kind: StorageKind, attr_types: Vec<DataType>) -> Self {
        Relation {
            name,
            arity,
            storage_kind,
            attr_types,
            rows: BTreeSet::new(),
            indexes: HashMap::new(),
        }
    }

    /// Insert a tuple; returns `true` if it was not already present (the
    /// "new" flag semi-naive evaluation needs to detect fixed point).
    pub fn insert(&mut self, tuple: Tuple) -> bool {
        for idx in self.indexes.values_mut() {
            idx.insert(self.arity, &tuple);
        }
        self.rows.insert(tuple)
    }

    pub fn remove(&mut self, tuple: &Tuple) -> bool {
        for idx in self.indexes.values_mut() {
            idx.remove(self.arity, tuple);
        }
        self.rows.remove(tuple)
    }

    pub fn contains(&self, tuple: &Tuple) -> bool {
        self.rows.contains(tuple)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Full scan in canonical (lexicographic) order.
    pub fn scan(&self) -> impl Iterator<Item = &Tuple> {
        self.rows.iter()
    }

    /// Ensure an index for this exact bound mask exists, building it from
    /// the current rows if it doesn't.
    fn ensure_index(&mut self, mask: u32) {
        if !self.indexes.contains_key(&mask) {
            let mut idx = Index::new(self.arity, mask);
            for row in &self.rows {
                idx.insert(self.arity, row);
            }
            self.indexes.insert(mask, idx);
        }
    }

    /// Tuples matching `bound_values` on the columns selected by `mask`, in
    /// ascending column order. Builds the index on first use.
    pub fn index_scan(&mut self, mask: u32, bound_values: &[Value]) -> Vec<Tuple> {
        self.ensure_index(mask);
        self.indexes[&mask].range(self.arity, bound_values)
    }

    /// Same result as `index_scan` but never builds or touches the cached
    /// index -- used from inside a `Parallel` branch, which only holds a
    /// shared read lock and cannot mutate the index cache.
    pub fn index_scan_readonly(&self, mask: u32, bound_values: &[Value]) -> Vec<Tuple> {
        let bound_cols = bound_columns(self.arity, mask);
        self.rows
            .iter()
            .filter(|row| {
                bound_cols
                    .iter()
                    .zip(bound_values)
                    .all(|(&c, v)| row.get(c) == Some(*v))
            })
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.indexes.clear();
    }
}

/// Owns every relation by interned name, plus relation-level operations
/// (`Create`/`Clear`/`Drop`/`Merge`/`Swap`) the LVM `Create`/... opcodes
/// dispatch into.
#[derive(Default)]
pub struct RelationManager {
    relations: HashMap<crate::symbol_table::SymbolId, Relation>,
}

impl RelationManager {
    pub fn create(
        &mut self,
        sym: crate::symbol_table::SymbolId,
        name: String,
        arity: usize,
        storage_kind: StorageKind,
        attr_types: Vec<DataType>,
    ) {
        self.relations
            .entry(sym)
            .or_insert_with(|| Relation::new(name, arity, storage_kind, attr_types));
    }

    pub fn get(&self, sym: crate::symbol_table::SymbolId) -> Option<&Relation> {
        self.relations.get(&sym)
    }

    pub fn get_mut(&mut self, sym: crate::symbol_table::SymbolId) -> Option<&mut Relation> {
        self.relations.get_mut(&sym)
    }

    pub fn clear(&mut self, sym: crate::symbol_table::SymbolId) {
        if let Some(r) = self.relations.get_mut(&sym) {
            r.clear();
        }
    }

    pub fn drop_relation(&mut self, sym: crate::symbol_table::SymbolId) {
        self.relations.remove(&sym);
    }

    /// Copy every tuple of `source` into `target`. Returns `true` if
    /// `target` grew -- the semi-naive fixed-point signal.
    pub fn merge(&mut self, target: crate::symbol_table::SymbolId, source: crate::symbol_table::SymbolId) -> bool {
        let rows: Vec<Tuple> = match self.relations.get(&source) {
            Some(r) => r.scan().cloned().collect(),
            None => return false,
        };
        let mut grew = false;
        if let Some(t) = self.relations.get_mut(&target) {
            for row in rows {
                grew |= t.insert(row);
            }
        }
        grew
    }

    pub fn swap(&mut self, a: crate::symbol_table::SymbolId, b: crate::symbol_table::SymbolId) {
        if a == b {
            return;
        }
        let ra = self.relations.remove(&a);
        let rb = self.relations.remove(&b);
        if let Some(r) = rb {
            self.relations.insert(a, r);
        }
        if let Some(r) = ra {
            self.relations.insert(b, r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(vals: &[i64]) -> Tuple {
        Tuple::new(vals.iter().map(|v| Value::Int(*v)).collect())
    }

    #[test]
    fn insert_deduplicates() {
        let mut r = Relation::new("r".into(), 2, StorageKind::BTree, vec![]);
        assert!(r.insert(t(&[1, 2])));
        assert!(!r.insert(t(&[1, 2])));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn scan_is_lexicographically_ordered() {
        let mut r = Relation::new("r".into(), 2, StorageKind::BTree, vec![]);
        r.insert(t(&[2, 0]));
        r.insert(t(&[1, 9]));
        r.insert(t(&[1, 5]));
        let rows: Vec<Tuple> = r.scan().cloned().collect();
        assert_eq!(rows, vec![t(&[1, 5]), t(&[1, 9]), t(&[2, 0])]);
    }

    #[test]
    fn index_scan_matches_bound_prefix() {
        let mut r = Relation::new("r".into(), 2, StorageKind::BTree, vec![]);
        r.insert(t(&[1, 2]));
        r.insert(t(&[1, 3]));
        r.insert(t(&[2, 2]));
        let mask = 0b01; // column 0 bound
        let matches = r.index_scan(mask, &[Value::Int(1)]);
        assert_eq!(matches.len(), 2);
        assert!(matches.contains(&t(&[1, 2])));
        assert!(matches.contains(&t(&[1, 3])));
    }

    #[test]
    fn index_built_lazily_reflects_rows_inserted_before_first_query() {
        let mut r = Relation::new("r".into(), 1, StorageKind::BTree, vec![]);
        r.insert(t(&[5]));
        let matches = r.index_scan(0b1, &[Value::Int(5)]);
        assert_eq!(matches, vec![t(&[5])]);
    }

    #[test]
    fn relation_manager_merge_reports_growth() {
        let mut mgr = RelationManager::default();
        let a = crate::symbol_table::SymbolId(0);
        let b = crate::symbol_table::SymbolId(1);
        mgr.create(a, "a".into(), 1, StorageKind::BTree, vec![]);
        mgr.create(b, "b".into(), 1, StorageKind::BTree, vec![]);
        mgr.get_mut(b).unwrap().insert(t(&[1]));
        assert!(mgr.merge(a, b));
        assert!(!mgr.merge(a, b));
    }

    #[test]
    fn swap_exchanges_contents() {
        let mut mgr = RelationManager::default();
        let a = crate::symbol_table::SymbolId(0);
        let b = crate::symbol_table::SymbolId(1);
        mgr.create(a, "a".into(), 1, StorageKind::BTree, vec![]);
        mgr.create(b, "b".into(), 1, StorageKind::BTree, vec![]);
        mgr.get_mut(a).unwrap().insert(t(&[1]));
        mgr.swap(a, b);
        assert!(mgr.get(a).unwrap().is_empty());
        assert_eq!(mgr.get(b).unwrap().len(), 1);
    }
}

/// Universal invariants from spec.md §8: projection idempotence, `Swap`/`Swap`
/// identity, and `Merge`'s size/containment bounds, checked over arbitrary
/// tuple sets rather than the fixed examples in the unit tests above.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_tuple(arity: usize) -> impl Strategy<Value = Tuple> {
        prop::collection::vec(any::<i32>().prop_map(|v| Value::Int(i64::from(v))), arity)
            .prop_map(Tuple::new)
    }

    fn arb_rows(arity: usize, max_len: usize) -> impl Strategy<Value = Vec<Tuple>> {
        prop::collection::vec(arb_tuple(arity), 0..max_len)
    }

    proptest! {
        /// Invariant 4: inserting an already-present tuple leaves `R` unchanged.
        #[test]
        fn projection_is_idempotent(rows in arb_rows(3, 20), repeat in arb_tuple(3)) {
            let mut r = Relation::new("r".into(), 3, StorageKind::BTree, vec![]);
            for row in &rows {
                r.insert(row.clone());
            }
            r.insert(repeat.clone());
            let before: Vec<Tuple> = r.scan().cloned().collect();
            let grew = r.insert(repeat);
            let after: Vec<Tuple> = r.scan().cloned().collect();
            prop_assert!(!grew);
            prop_assert_eq!(before, after);
        }

        /// Invariant 5: `Swap(A,B); Swap(A,B)` is identity on relation contents.
        #[test]
        fn double_swap_is_identity(a_rows in arb_rows(2, 15), b_rows in arb_rows(2, 15)) {
            let mut mgr = RelationManager::default();
            let a = crate::symbol_table::SymbolId(0);
            let b = crate::symbol_table::SymbolId(1);
            mgr.create(a, "a".into(), 2, StorageKind::BTree, vec![]);
            mgr.create(b, "b".into(), 2, StorageKind::BTree, vec![]);
            for row in &a_rows {
                mgr.get_mut(a).unwrap().insert(row.clone());
            }
            for row in &b_rows {
                mgr.get_mut(b).unwrap().insert(row.clone());
            }
            let a_before: Vec<Tuple> = mgr.get(a).unwrap().scan().cloned().collect();
            let b_before: Vec<Tuple> = mgr.get(b).unwrap().scan().cloned().collect();
            mgr.swap(a, b);
            mgr.swap(a, b);
            let a_after: Vec<Tuple> = mgr.get(a).unwrap().scan().cloned().collect();
            let b_after: Vec<Tuple> = mgr.get(b).unwrap().scan().cloned().collect();
            prop_assert_eq!(a_before, a_after);
            prop_assert_eq!(b_before, b_after);
        }

        /// Invariant 6: after `Merge(A, B)`, `A ⊇ B_pre ∪ A_pre` and
        /// `|A| <= |A_pre| + |B_pre|`.
        #[test]
        fn merge_bounds_hold(a_rows in arb_rows(2, 15), b_rows in arb_rows(2, 15)) {
            let mut mgr = RelationManager::default();
            let a = crate::symbol_table::SymbolId(0);
            let b = crate::symbol_table::SymbolId(1);
            mgr.create(a, "a".into(), 2, StorageKind::BTree, vec![]);
            mgr.create(b, "b".into(), 2, StorageKind::BTree, vec![]);
            for row in &a_rows {
                mgr.get_mut(a).unwrap().insert(row.clone());
            }
            for row in &b_rows {
                mgr.get_mut(b).unwrap().insert(row.clone());
            }
            let a_pre_len = mgr.get(a).unwrap().len();
            let b_pre_len = mgr.get(b).unwrap().len();
            mgr.merge(a, b);
            let merged = mgr.get(a).unwrap();
            prop_assert!(merged.len() <= a_pre_len + b_pre_len);
            for row in a_rows.iter().chain(b_rows.iter()) {
                prop_assert!(merged.contains(row));
            }
        }
    }
}
