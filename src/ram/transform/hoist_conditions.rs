//! `HoistConditions`: for each query, walks scans outermost-in and moves
//! every filter to the earliest position where its condition-level is
//! already in scope. Relies on filters being fully split (one condition per
//! `Filter`) -- `ram_builder` guarantees that, and a conjunction reaching
//! here is a compile-time invariant violation.

use crate::ram::analysis::condition_level;
use crate::ram::error::RamError;
use crate::ram::node::RamNode;
use crate::ram::transform::spine::{self, Link};

/// Run one fixed-point-iteration's worth of hoisting over the whole program.
/// Returns the rewritten program and whether anything moved.
pub fn run(program: RamNode) -> Result<(RamNode, bool), RamError> {
    let mut changed_overall = false;
    let mut error = None;
    let (program, _) = spine::recurse_into_queries(program, &mut |spine_root| {
        match hoist_spine(spine_root) {
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

fn hoist_spine(node: RamNode) -> Result<(RamNode, bool), RamError> {
    let (links, terminal) = spine::flatten(node);

    // Recurse into the terminal in case it hides further queries (e.g. a
    // `Sequence` of multiple rule bodies sharing a prefix).
    let mut terminal_changed = false;
    let terminal = {
        let mut err = None;
        let (t, c) = spine::recurse_into_queries(terminal, &mut |n| match hoist_spine(n) {
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

    // Structural checkpoints: (link-index-among-non-filters, level introduced).
    let mut checkpoints: Vec<(usize, usize)> = Vec::new();
    let mut non_filter_count = 0usize;
    for link in &links {
        if let Some(level) = link.introduces_level() {
            checkpoints.push((non_filter_count, level));
        }
        if !matches!(link, Link::Filter(_)) {
            non_filter_count += 1;
        }
    }

    let frame_count = non_filter_count;
    let mut buckets: Vec<Vec<crate::ram::node::RamCondition>> = (0..=frame_count).map(|_| Vec::new()).collect();
    let mut any_moved = false;

    // Second pass: walk again, this time tracking the *original* bucket of
    // each filter (count of non-filter links preceding it) to compute the
    // hoist target and detect movement.
    let mut preceding_non_filters = 0usize;
    let mut non_filter_links: Vec<Link> = Vec::with_capacity(frame_count);
    for link in links {
        match link {
            Link::Filter(condition) => {
                let level = condition_level(&condition);
                let target = if level < 0 {
                    0
                } else {
                    let level = level as usize;
                    checkpoints
                        .iter()
                        .find(|(_, l)| *l == level)
                        .map(|(idx, _)| idx + 1)
                        .ok_or(RamError::DanglingTupleId(level))?
                };
                if target < preceding_non_filters {
                    any_moved = true;
                }
                buckets[target].push(condition);
            }
            other => {
                preceding_non_filters += 1;
                non_filter_links.push(other);
            }
        }
    }

    let mut rebuilt_links: Vec<Link> = Vec::new();
    for (i, link) in non_filter_links.into_iter().enumerate() {
        for cond in buckets[i].drain(..) {
            rebuilt_links.push(Link::Filter(cond));
        }
        rebuilt_links.push(link);
    }
    for cond in buckets[frame_count].drain(..) {
        rebuilt_links.push(Link::Filter(cond));
    }

    let node = spine::rebuild(rebuilt_links, terminal);
    Ok((node, any_moved || terminal_changed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::node::{CompareOp, RamCondition, RamExpression, RelationRef};
    use crate::ram::value::Value;

    fn tup(level: usize, col: usize) -> RamExpression {
        RamExpression::TupleElement { level, col }
    }

    #[test]
    fn hoists_filter_to_its_minimal_scan() {
        // Query( Scan(0, edge) { Scan(1, node) { Filter(tuple.0.col0 == 1) { Project } } } )
        let inner = RamNode::Filter {
            condition: RamCondition::Comparison(CompareOp::Eq, tup(0, 0), RamExpression::Constant(Value::Int(1))),
            body: Box::new(RamNode::Project {
                relation: RelationRef::new("out", 1),
                values: vec![tup(0, 0)],
            }),
        };
        let nested = RamNode::Scan {
            relation: RelationRef::new("edge", 2),
            tuple_id: 0,
            body: Box::new(RamNode::Scan {
                relation: RelationRef::new("node", 1),
                tuple_id: 1,
                body: Box::new(inner),
            }),
        };
        let query = RamNode::Query(Box::new(nested));

        let (rewritten, changed) = run(query).unwrap();
        assert!(changed);

        // The filter should now sit directly under the tuple_id=0 scan.
        if let RamNode::Query(body) = rewritten {
            if let RamNode::Scan { body, .. } = *body {
                assert!(matches!(*body, RamNode::Filter { .. }));
            } else {
                panic!("expected outer scan");
            }
        } else {
            panic!("expected query");
        }
    }

    #[test]
    fn already_hoisted_filter_reports_no_change() {
        let inner = RamNode::Filter {
            condition: RamCondition::Comparison(CompareOp::Eq, tup(1, 0), RamExpression::Constant(Value::Int(1))),
            body: Box::new(RamNode::Project {
                relation: RelationRef::new("out", 1),
                values: vec![tup(1, 0)],
            }),
        };
        let nested = RamNode::Scan {
            relation: RelationRef::new("edge", 2),
            tuple_id: 0,
            body: Box::new(RamNode::Scan {
                relation: RelationRef::new("node", 1),
                tuple_id: 1,
                body: Box::new(inner),
            }),
        };
        let query = RamNode::Query(Box::new(nested));
        let (_, changed) = run(query).unwrap();
        assert!(!changed);
    }
}
