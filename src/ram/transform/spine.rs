//! Shared plumbing for the three transformer passes: flattening the linear
//! chain of `Scan`/`IndexScan`/`Filter`/`UnpackRecord`/`Aggregate` nodes that
//! makes up a single query's "spine" into an ordered list, and rebuilding a
//! spine from such a list. `HoistConditions`, `MakeIndex`, and `IfConversion`
//! all operate on this representation rather than re-deriving it.

use crate::ram::node::{AggregateOp, Pattern, RamCondition, RamExpression, RamNode, RelationRef};

/// One link in a query's spine. Everything that isn't one of these variants
/// is the spine's terminal node (a `Project`, a further control construct,
/// etc.) and is left untouched by spine-level rewriting.
pub enum Link {
    Scan {
        relation: RelationRef,
        tuple_id: usize,
    },
    IndexScan {
        relation: RelationRef,
        tuple_id: usize,
        pattern: Pattern,
    },
    UnpackRecord {
        expr: RamExpression,
        arity: usize,
        tuple_id: usize,
    },
    Aggregate {
        relation: RelationRef,
        tuple_id: usize,
        func: AggregateOp,
        target: RamExpression,
        pattern: Pattern,
    },
    Filter(RamCondition),
}

impl Link {
    /// The tuple identifier this link exposes to the rest of the spine, if
    /// any. `Aggregate`'s own tuple id is bound to its one-element result
    /// tuple (`[reduced value]`) once the reduction loop completes, and that
    /// binding is readable from the continuation via `TupleElement{level,
    /// col: 0}`, so it extends scope exactly like a scan's tuple id does.
    pub fn introduces_level(&self) -> Option<usize> {
        match self {
            Link::Scan { tuple_id, .. }
            | Link::IndexScan { tuple_id, .. }
            | Link::UnpackRecord { tuple_id, .. }
            | Link::Aggregate { tuple_id, .. } => Some(*tuple_id),
            Link::Filter(_) => None,
        }
    }
}

/// Split `node` into its leading chain of spine links and the first node
/// that isn't one of them.
pub fn flatten(node: RamNode) -> (Vec<Link>, RamNode) {
    match node {
        RamNode::Scan {
            relation,
            tuple_id,
            body,
        } => {
            let (mut links, terminal) = flatten(*body);
            links.insert(0, Link::Scan { relation, tuple_id });
            (links, terminal)
        }
        RamNode::IndexScan {
            relation,
            tuple_id,
            pattern,
            body,
        } => {
            let (mut links, terminal) = flatten(*body);
            links.insert(
                0,
                Link::IndexScan {
                    relation,
                    tuple_id,
                    pattern,
                },
            );
            (links, terminal)
        }
        RamNode::UnpackRecord {
            expr,
            arity,
            tuple_id,
            body,
        } => {
            let (mut links, terminal) = flatten(*body);
            links.insert(
                0,
                Link::UnpackRecord {
                    expr,
                    arity,
                    tuple_id,
                },
            );
            (links, terminal)
        }
        RamNode::Aggregate {
            relation,
            tuple_id,
            func,
            target,
            pattern,
            body,
        } => {
            let (mut links, terminal) = flatten(*body);
            links.insert(
                0,
                Link::Aggregate {
                    relation,
                    tuple_id,
                    func,
                    target,
                    pattern,
                },
            );
            (links, terminal)
        }
        RamNode::Filter { condition, body } => {
            let (mut links, terminal) = flatten(*body);
            links.insert(0, Link::Filter(condition));
            (links, terminal)
        }
        other => (Vec::new(), other),
    }
}

/// Re-wrap `links` around `terminal`, innermost-last.
pub fn rebuild(links: Vec<Link>, terminal: RamNode) -> RamNode {
    links.into_iter().rev().fold(terminal, |body, link| match link {
        Link::Scan { relation, tuple_id } => RamNode::Scan {
            relation,
            tuple_id,
            body: Box::new(body),
        },
        Link::IndexScan {
            relation,
            tuple_id,
            pattern,
        } => RamNode::IndexScan {
            relation,
            tuple_id,
            pattern,
            body: Box::new(body),
        },
        Link::UnpackRecord {
            expr,
            arity,
            tuple_id,
        } => RamNode::UnpackRecord {
            expr,
            arity,
            tuple_id,
            body: Box::new(body),
        },
        Link::Aggregate {
            relation,
            tuple_id,
            func,
            target,
            pattern,
        } => RamNode::Aggregate {
            relation,
            tuple_id,
            func,
            target,
            pattern,
            body: Box::new(body),
        },
        Link::Filter(condition) => RamNode::Filter {
            condition,
            body: Box::new(body),
        },
    })
}

/// Recurse a pass's spine-level transform `f` into every `Query` node
/// reachable through control constructs, leaving everything else alone.
/// Every pass shares this traversal: only the spine rewriting differs.
pub fn recurse_into_queries(
    node: RamNode,
    f: &mut dyn FnMut(RamNode) -> (RamNode, bool),
) -> (RamNode, bool) {
    match node {
        RamNode::Query(body) => {
            let (new_body, changed) = f(*body);
            (RamNode::Query(Box::new(new_body)), changed)
        }
        RamNode::Sequence(nodes) => {
            let mut changed = false;
            let nodes = nodes
                .into_iter()
                .map(|n| {
                    let (n, c) = recurse_into_queries(n, f);
                    changed |= c;
                    n
                })
                .collect();
            (RamNode::Sequence(nodes), changed)
        }
        RamNode::Parallel(nodes) => {
            let mut changed = false;
            let nodes = nodes
                .into_iter()
                .map(|n| {
                    let (n, c) = recurse_into_queries(n, f);
                    changed |= c;
                    n
                })
                .collect();
            (RamNode::Parallel(nodes), changed)
        }
        RamNode::Loop(body) => {
            let (body, changed) = recurse_into_queries(*body, f);
            (RamNode::Loop(Box::new(body)), changed)
        }
        RamNode::Stratum { index, body } => {
            let (body, changed) = recurse_into_queries(*body, f);
            (
                RamNode::Stratum {
                    index,
                    body: Box::new(body),
                },
                changed,
            )
        }
        RamNode::LogTimer { message, body } => {
            let (body, changed) = recurse_into_queries(*body, f);
            (
                RamNode::LogTimer {
                    message,
                    body: Box::new(body),
                },
                changed,
            )
        }
        RamNode::DebugInfo { message, body } => {
            let (body, changed) = recurse_into_queries(*body, f);
            (
                RamNode::DebugInfo {
                    message,
                    body: Box::new(body),
                },
                changed,
            )
        }
        // Scans/filters/etc. outside of a `Query` wrapper don't occur in a
        // well-formed program (`ram_builder` always wraps a top-level scan
        // nest in `Query`), but recurse defensively so a malformed tree
        // degrades gracefully instead of silently dropping nested queries.
        RamNode::Scan {
            relation,
            tuple_id,
            body,
        } => {
            let (body, changed) = recurse_into_queries(*body, f);
            (
                RamNode::Scan {
                    relation,
                    tuple_id,
                    body: Box::new(body),
                },
                changed,
            )
        }
        RamNode::IndexScan {
            relation,
            tuple_id,
            pattern,
            body,
        } => {
            let (body, changed) = recurse_into_queries(*body, f);
            (
                RamNode::IndexScan {
                    relation,
                    tuple_id,
                    pattern,
                    body: Box::new(body),
                },
                changed,
            )
        }
        RamNode::Filter { condition, body } => {
            let (body, changed) = recurse_into_queries(*body, f);
            (
                RamNode::Filter {
                    condition,
                    body: Box::new(body),
                },
                changed,
            )
        }
        RamNode::UnpackRecord {
            expr,
            arity,
            tuple_id,
            body,
        } => {
            let (body, changed) = recurse_into_queries(*body, f);
            (
                RamNode::UnpackRecord {
                    expr,
                    arity,
                    tuple_id,
                    body: Box::new(body),
                },
                changed,
            )
        }
        RamNode::Aggregate {
            relation,
            tuple_id,
            func,
            target,
            pattern,
            body,
        } => {
            let (body, changed) = recurse_into_queries(*body, f);
            (
                RamNode::Aggregate {
                    relation,
                    tuple_id,
                    func,
                    target,
                    pattern,
                    body: Box::new(body),
                },
                changed,
            )
        }
        leaf => (leaf, false),
    }
}
