//! # RAM Analyses
//!
//! Three pure functions over the RAM tree. None of them cache results
//! across transformer passes -- each pass rebuilds from scratch, since the
//! tree is rewritten between passes.

use crate::ram::node::{RamCondition, RamExpression};

/// Deepest tuple identifier referenced by `expr`, or `-1` if it references
/// none (a constant): constants bottom out at `-1`, a tuple element is the
/// level of that tuple, and connectives take the max of their operands.
pub fn expression_level(expr: &RamExpression) -> i64 {
    match expr {
        RamExpression::Constant(_) | RamExpression::AutoIncrement => -1,
        RamExpression::TupleElement { level, .. } => *level as i64,
        RamExpression::BinaryOp { left, right, .. } => {
            expression_level(left).max(expression_level(right))
        }
        RamExpression::Negate(inner) => expression_level(inner),
        RamExpression::PackRecord(fields) => {
            fields.iter().map(expression_level).max().unwrap_or(-1)
        }
    }
}

/// Deepest tuple identifier referenced by `cond`, same recursion as
/// `expression_level` but over the condition tree.
pub fn condition_level(cond: &RamCondition) -> i64 {
    match cond {
        RamCondition::True | RamCondition::False => -1,
        RamCondition::Conjunction(a, b) => condition_level(a).max(condition_level(b)),
        RamCondition::Negation(inner) => condition_level(inner),
        RamCondition::Comparison(_, left, right) => {
            expression_level(left).max(expression_level(right))
        }
        RamCondition::EmptinessCheck(_) => -1,
        RamCondition::ExistenceCheck(_, pattern) => pattern_level(pattern),
        RamCondition::ProvenanceExistenceCheck(_, pattern, level_expr) => {
            pattern_level(pattern).max(expression_level(level_expr))
        }
    }
}

fn pattern_level(pattern: &[Option<RamExpression>]) -> i64 {
    pattern
        .iter()
        .filter_map(|slot| slot.as_ref().map(expression_level))
        .max()
        .unwrap_or(-1)
}

/// True iff `expr` is free of tuple references, I/O, and auto-increment --
/// i.e. it can be evaluated once, outside any scan nest.
pub fn const_value(expr: &RamExpression) -> bool {
    match expr {
        RamExpression::Constant(_) => true,
        RamExpression::TupleElement { .. } | RamExpression::AutoIncrement => false,
        RamExpression::BinaryOp { left, right, .. } => const_value(left) && const_value(right),
        RamExpression::Negate(inner) => const_value(inner),
        RamExpression::PackRecord(fields) => fields.iter().all(const_value),
    }
}
