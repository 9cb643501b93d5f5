//! `MakeIndex`: after hoisting, inspects the filter chain immediately below
//! each `Scan`/`Aggregate` for equalities of the form `tuple.k = e` (or
//! `e = tuple.k`) where `e` does not reference that same tuple, and folds
//! them into a query pattern, rewriting the `Scan` into an `IndexScan`.
//! Leftmost matching equality wins; an attribute constrained twice is
//! `RamError::DuplicatePatternAttribute`.

use crate::ram::error::RamError;
use crate::ram::node::{CompareOp, Pattern, RamCondition, RamExpression, RamNode};
use crate::ram::transform::spine::{self, Link};

pub fn run(program: RamNode) -> Result<(RamNode, bool), RamError> {
    let mut changed_overall = false;
    let mut error = None;
    let (program, _) = spine::recurse_into_queries(program, &mut |spine_root| {
        match make_index_spine(spine_root) {
            Ok((node, changed)) => {
                changed_overall |= changed;
                (node, changed)
            }
            Err(e) => {
                error = Some(e);
                (RamNode::Nop, false)
            }
        }
    });
    if let Some(e) = error {
        return Err(e);
    }
    Ok((program, changed_overall))
}

fn make_index_spine(node: RamNode) -> Result<(RamNode, bool), RamError> {
    let (links, terminal) = spine::flatten(node);

    let mut terminal_changed = false;
    let terminal = {
        let mut err = None;
        let (t, c) = spine::recurse_into_queries(terminal, &mut |n| match make_index_spine(n) {
            Ok((n, c)) => (n, c),
            Err(e) => {
                err = Some(e);
                (RamNode::Nop, false)
            }
        });
        if let Some(e) = err {
            return Err(e);
        }
        terminal_changed = c;
        t
    };

    let mut rebuilt: Vec<Link> = Vec::with_capacity(links.len());
    let mut any_changed = terminal_changed;
    let mut iter = links.into_iter().peekable();
    while let Some(link) = iter.next() {
        match link {
            Link::Scan { relation, tuple_id } => {
                let arity = relation.arity;
                let (pattern, remaining, matched_any) =
                    extract_pattern(&mut iter, tuple_id, arity)?;
                if matched_any {
                    rebuilt.push(Link::IndexScan {
                        relation,
                        tuple_id,
                        pattern,
                    });
                    any_changed = true;
                } else {
                    rebuilt.push(Link::Scan { relation, tuple_id });
                }
                for cond in remaining {
                    rebuilt.push(Link::Filter(cond));
                }
            }
            other => rebuilt.push(other),
        }
    }

    Ok((spine::rebuild(rebuilt, terminal), any_changed))
}

/// Consume filters immediately following a scan at `tuple_id`, pulling out
/// equalities against that tuple's own columns into a pattern. Filters that
/// don't match (or reference `tuple_id` on both sides) are left in
/// `remaining`, in original order.
fn extract_pattern(
    iter: &mut std::iter::Peekable<std::vec::IntoIter<Link>>,
    tuple_id: usize,
    arity: usize,
) -> Result<(Pattern, Vec<RamCondition>, bool), RamError> {
    let mut pattern: Pattern = vec![None; arity];
    let mut remaining = Vec::new();
    let mut matched_any = false;

    loop {
        match iter.peek() {
            Some(Link::Filter(_)) => {
                let Some(Link::Filter(condition)) = iter.next() else {
                    unreachable!()
                };
                if let Some((col, expr)) = match_column_equality(&condition, tuple_id) {
                    if pattern[col].is_some() {
                        return Err(RamError::DuplicatePatternAttribute(col));
                    }
                    pattern[col] = Some(expr);
                    matched_any = true;
                } else {
                    remaining.push(condition);
                }
            }
            _ => break,
        }
    }

    Ok((pattern, remaining, matched_any))
}

/// If `condition` is `tuple_id.col == e` or `e == tuple_id.col` with `e`
/// free of any reference to `tuple_id`, return `(col, e)`.
fn match_column_equality(condition: &RamCondition, tuple_id: usize) -> Option<(usize, RamExpression)> {
    let RamCondition::Comparison(CompareOp::Eq, left, right) = condition else {
        return None;
    };
    if let RamExpression::TupleElement { level, col } = left {
        if *level == tuple_id && !expr_references_level(right, tuple_id) {
            return Some((*col, right.clone()));
        }
    }
    if let RamExpression::TupleElement { level, col } = right {
        if *level == tuple_id && !expr_references_level(left, tuple_id) {
            return Some((*col, left.clone()));
        }
    }
    None
}

fn expr_references_level(expr: &RamExpression, level: usize) -> bool {
    match expr {
        RamExpression::Constant(_) | RamExpression::AutoIncrement => false,
        RamExpression::TupleElement { level: l, .. } => *l == level,
        RamExpression::BinaryOp { left, right, .. } => {
            expr_references_level(left, level) || expr_references_level(right, level)
        }
        RamExpression::Negate(inner) => expr_references_level(inner, level),
        RamExpression::PackRecord(fields) => fields.iter().any(|f| expr_references_level(f, level)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::node::{RamExpression, RelationRef};
    use crate::ram::value::Value;

    #[test]
    fn rewrites_scan_with_equality_into_index_scan() {
        // Scan(0, r) { Filter(tuple.0.0 == 1) { Project() } }
        let inner = RamNode::Filter {
            condition: RamCondition::Comparison(
                CompareOp::Eq,
                RamExpression::TupleElement { level: 0, col: 0 },
                RamExpression::Constant(Value::Int(1)),
            ),
            body: Box::new(RamNode::Project {
                relation: RelationRef::new("q", 1),
                values: vec![RamExpression::TupleElement { level: 0, col: 1 }],
            }),
        };
        let scan = RamNode::Scan {
            relation: RelationRef::new("r", 2),
            tuple_id: 0,
            body: Box::new(inner),
        };
        let query = RamNode::Query(Box::new(scan));
        let (rewritten, changed) = run(query).unwrap();
        assert!(changed);
        if let RamNode::Query(body) = rewritten {
            match *body {
                RamNode::IndexScan { pattern, .. } => {
                    assert_eq!(pattern.len(), 2);
                    assert!(pattern[0].is_some());
                    assert!(pattern[1].is_none());
                }
                other => panic!("expected IndexScan, got {other:?}"),
            }
        } else {
            panic!("expected query");
        }
    }

    #[test]
    fn duplicate_attribute_constraint_is_an_error() {
        let body = RamNode::Filter {
            condition: RamCondition::Comparison(
                CompareOp::Eq,
                RamExpression::TupleElement { level: 0, col: 0 },
                RamExpression::Constant(Value::Int(1)),
            ),
            body: Box::new(RamNode::Filter {
                condition: RamCondition::Comparison(
                    CompareOp::Eq,
                    RamExpression::TupleElement { level: 0, col: 0 },
                    RamExpression::Constant(Value::Int(2)),
                ),
                body: Box::new(RamNode::Project {
                    relation: RelationRef::new("q", 1),
                    values: vec![],
                }),
            }),
        };
        let scan = RamNode::Scan {
            relation: RelationRef::new("r", 1),
            tuple_id: 0,
            body: Box::new(body),
        };
        let query = RamNode::Query(Box::new(scan));
        assert!(matches!(run(query), Err(RamError::DuplicatePatternAttribute(0))));
    }
}
