//! `IfConversion`: if an `IndexScan`'s body never references its own tuple
//! identifier, the scan contributes nothing but a boolean -- replace it
//! with an `ExistenceCheck` against the same pattern, eliminating the
//! iterator entirely.

use crate::ram::error::RamError;
use crate::ram::node::{RamCondition, RamExpression, RamNode};
use crate::ram::transform::spine::{self, Link};

pub fn run(program: RamNode) -> Result<(RamNode, bool), RamError> {
    let mut changed_overall = false;
    let mut error = None;
    let (program, _) = spine::recurse_into_queries(program, &mut |spine_root| {
        match if_conversion_spine(spine_root) {
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

fn if_conversion_spine(node: RamNode) -> Result<(RamNode, bool), RamError> {
    let (links, terminal) = spine::flatten(node);

    let mut terminal_changed = false;
    let terminal = {
        let mut err = None;
        let (t, c) = spine::recurse_into_queries(terminal, &mut |n| match if_conversion_spine(n) {
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

    // Process right-to-left so a converted IndexScan's former continuation
    // (everything to its right, now folded into `continuation`) is already
    // final by the time we ask whether an outer IndexScan's tuple id is
    // referenced in it.
    let mut continuation = terminal;
    let mut any_changed = terminal_changed;
    for link in links.into_iter().rev() {
        match link {
            Link::IndexScan {
                relation,
                tuple_id,
                pattern,
            } if !node_references_level(&continuation, tuple_id) => {
                any_changed = true;
                continuation = RamNode::Filter {
                    condition: RamCondition::ExistenceCheck(relation, pattern),
                    body: Box::new(continuation),
                };
            }
            other => {
                continuation = spine::rebuild(vec![other], continuation);
            }
        }
    }

    Ok((continuation, any_changed))
}

fn node_references_level(node: &RamNode, level: usize) -> bool {
    match node {
        RamNode::Scan { tuple_id, body, .. } => *tuple_id == level || node_references_level(body, level),
        RamNode::IndexScan {
            tuple_id,
            pattern,
            body,
            ..
        } => {
            *tuple_id == level
                || pattern_references_level(pattern, level)
                || node_references_level(body, level)
        }
        RamNode::Filter { condition, body } => {
            condition_references_level(condition, level) || node_references_level(body, level)
        }
        RamNode::Project { values, .. } => values.iter().any(|v| expr_references_level(v, level)),
        RamNode::Aggregate {
            tuple_id,
            target,
            pattern,
            body,
            ..
        } => {
            *tuple_id == level
                || expr_references_level(target, level)
                || pattern_references_level(pattern, level)
                || node_references_level(body, level)
        }
        RamNode::UnpackRecord {
            expr,
            tuple_id,
            body,
            ..
        } => *tuple_id == level || expr_references_level(expr, level) || node_references_level(body, level),
        RamNode::Sequence(nodes) | RamNode::Parallel(nodes) => {
            nodes.iter().any(|n| node_references_level(n, level))
        }
        RamNode::Loop(body) | RamNode::Query(body) => node_references_level(body, level),
        RamNode::Stratum { body, .. } => node_references_level(body, level),
        RamNode::Exit(condition) => condition_references_level(condition, level),
        RamNode::Fact { values, .. } => values.iter().any(|v| expr_references_level(v, level)),
        RamNode::LogTimer { body, .. } | RamNode::DebugInfo { body, .. } => node_references_level(body, level),
        RamNode::Create { .. }
        | RamNode::Clear(_)
        | RamNode::Drop(_)
        | RamNode::Load { .. }
        | RamNode::Store { .. }
        | RamNode::Merge { .. }
        | RamNode::Swap { .. }
        | RamNode::LogSize(_)
        | RamNode::ResetIterationNumber
        | RamNode::Nop => false,
    }
}

fn pattern_references_level(pattern: &[Option<RamExpression>], level: usize) -> bool {
    pattern
        .iter()
        .flatten()
        .any(|e| expr_references_level(e, level))
}

fn condition_references_level(cond: &RamCondition, level: usize) -> bool {
    match cond {
        RamCondition::True | RamCondition::False => false,
        RamCondition::Conjunction(a, b) => {
            condition_references_level(a, level) || condition_references_level(b, level)
        }
        RamCondition::Negation(inner) => condition_references_level(inner, level),
        RamCondition::Comparison(_, left, right) => {
            expr_references_level(left, level) || expr_references_level(right, level)
        }
        RamCondition::EmptinessCheck(_) => false,
        RamCondition::ExistenceCheck(_, pattern) => pattern_references_level(pattern, level),
        RamCondition::ProvenanceExistenceCheck(_, pattern, level_expr) => {
            pattern_references_level(pattern, level) || expr_references_level(level_expr, level)
        }
    }
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
    use crate::ram::node::RelationRef;
    use crate::ram::value::Value;

    #[test]
    fn converts_unused_index_scan_to_existence_check() {
        // IndexScan(0, p, pattern={0: 5}) { Project(q, []) }  -- body doesn't use tuple 0
        let scan = RamNode::IndexScan {
            relation: RelationRef::new("p", 1),
            tuple_id: 0,
            pattern: vec![Some(RamExpression::Constant(Value::Int(5)))],
            body: Box::new(RamNode::Project {
                relation: RelationRef::new("q", 0),
                values: vec![],
            }),
        };
        let query = RamNode::Query(Box::new(scan));
        let (rewritten, changed) = run(query).unwrap();
        assert!(changed);
        if let RamNode::Query(body) = rewritten {
            assert!(matches!(
                *body,
                RamNode::Filter {
                    condition: RamCondition::ExistenceCheck(_, _),
                    ..
                }
            ));
        } else {
            panic!("expected query");
        }
    }

    #[test]
    fn keeps_index_scan_whose_body_reads_its_tuple() {
        let scan = RamNode::IndexScan {
            relation: RelationRef::new("p", 1),
            tuple_id: 0,
            pattern: vec![None],
            body: Box::new(RamNode::Project {
                relation: RelationRef::new("q", 1),
                values: vec![RamExpression::TupleElement { level: 0, col: 0 }],
            }),
        };
        let query = RamNode::Query(Box::new(scan));
        let (_, changed) = run(query).unwrap();
        assert!(!changed);
    }
}
