//! Per-rule translation from a parsed `Rule` straight to a `RamNode` body.
//!
//! Joins are naive nested `Scan`s with `Filter`s inlined as soon as their
//! operands come into scope; the transformer pipeline (`ram::transform`)
//! is responsible for hoisting/rewriting those into `IndexScan`s later.
//! This module only has to be *correct*, not fast.

use std::collections::HashMap;

use datalog_ast::{AggregateFunc, ArithExpr, ArithOp, Atom, BodyPredicate, Constraint, Rule, Term};

use crate::ram::error::RamError;
use crate::ram::node::{
    AggregateOp, BinOp, CompareOp, Pattern, RamCondition, RamExpression, RamNode, RelationRef,
};
use crate::ram::value::Value;
use crate::symbol_table::SymbolTable;

/// Variable name -> (tuple_id, column) of its first binding site.
type Bindings = HashMap<String, (usize, usize)>;

/// Lower one rule's body into a `RamNode` that, when run, derives and
/// `Project`s into `target` (which may differ from `rule.head.relation`
/// when this call is a semi-naive `$delta`/`$new` variant).
///
/// `atom_source(i, name)` gives the relation name the i-th positive body
/// atom should actually scan -- `name` unchanged for a plain evaluation,
/// or a `$delta` substitute for exactly one atom in a semi-naive step.
pub(crate) fn lower_rule(
    rule: &Rule,
    arities: &HashMap<String, usize>,
    atom_source: &dyn Fn(usize, &str) -> String,
    symtab: &SymbolTable,
    target: &RelationRef,
) -> Result<RamNode, RamError> {
    let positives = positive_atoms(rule);

    let is_aggregate_rule =
        rule.head.args.len() == 1 && matches!(rule.head.args[0], Term::Aggregate(_, _));
    if is_aggregate_rule {
        return lower_aggregate_rule(rule, &positives, arities, atom_source, symtab, target);
    }

    let mut bindings: Bindings = HashMap::new();
    let mut local_filters: Vec<Vec<RamCondition>> = vec![Vec::new(); positives.len()];

    for (idx, atom) in positives.iter().enumerate() {
        let arity = declared_arity(arities, &atom.relation)?;
        if atom.args.len() != arity {
            return Err(arity_mismatch(&atom.relation, atom.args.len(), arity));
        }
        for (col, arg) in atom.args.iter().enumerate() {
            bind_body_term(arg, idx, col, &mut bindings, &mut local_filters[idx], symtab)?;
        }
    }

    let mut late_filters = Vec::new();
    for c in &rule.constraints {
        late_filters.push(lower_constraint(c, &bindings, symtab)?);
    }
    for pred in &rule.body {
        if let BodyPredicate::Negated(atom) = pred {
            late_filters.push(lower_negation(atom, &bindings, arities, symtab)?);
        }
    }

    let values = rule
        .head
        .args
        .iter()
        .map(|t| term_to_expr(t, &bindings, symtab))
        .collect::<Result<Vec<_>, _>>()?;

    let mut node = RamNode::Project {
        relation: target.clone(),
        values,
    };
    for cond in late_filters.into_iter().rev() {
        node = RamNode::Filter {
            condition: cond,
            body: Box::new(node),
        };
    }
    node = wrap_scans(node, &positives, arities, atom_source, &mut local_filters);
    Ok(node)
}

pub(crate) fn build_fact(rule: &Rule, symtab: &SymbolTable) -> Result<RamNode, RamError> {
    let values = rule
        .head
        .args
        .iter()
        .map(|t| const_term_to_expr(t, symtab))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RamNode::Fact {
        relation: RelationRef::new(rule.head.relation.clone(), rule.head.args.len()),
        values,
    })
}

fn positive_atoms(rule: &Rule) -> Vec<&Atom> {
    rule.body
        .iter()
        .filter_map(|p| match p {
            BodyPredicate::Positive(a) => Some(a),
            BodyPredicate::Negated(_) => None,
        })
        .collect()
}

fn declared_arity(arities: &HashMap<String, usize>, relation: &str) -> Result<usize, RamError> {
    arities
        .get(relation)
        .copied()
        .ok_or_else(|| RamError::UndeclaredRelation(relation.to_string()))
}

fn arity_mismatch(relation: &str, got: usize, declared: usize) -> RamError {
    RamError::Lowering(format!(
        "relation `{relation}` used with {got} args, declared arity {declared}"
    ))
}

fn bind_body_term(
    arg: &Term,
    idx: usize,
    col: usize,
    bindings: &mut Bindings,
    filters: &mut Vec<RamCondition>,
    symtab: &SymbolTable,
) -> Result<(), RamError> {
    match arg {
        Term::Variable(name) => {
            if let Some(&(lvl, c)) = bindings.get(name) {
                filters.push(RamCondition::Comparison(
                    CompareOp::Eq,
                    RamExpression::TupleElement { level: idx, col },
                    RamExpression::TupleElement { level: lvl, col: c },
                ));
            } else {
                bindings.insert(name.clone(), (idx, col));
            }
            Ok(())
        }
        Term::Placeholder => Ok(()),
        Term::Constant(_) | Term::FloatConstant(_) | Term::StringConstant(_) => {
            let expr = const_term_to_expr(arg, symtab)?;
            filters.push(RamCondition::Comparison(
                CompareOp::Eq,
                RamExpression::TupleElement { level: idx, col },
                expr,
            ));
            Ok(())
        }
        other => Err(RamError::Lowering(format!(
            "unsupported term in body position: {other:?}"
        ))),
    }
}

fn wrap_scans(
    mut node: RamNode,
    positives: &[&Atom],
    arities: &HashMap<String, usize>,
    atom_source: &dyn Fn(usize, &str) -> String,
    local_filters: &mut [Vec<RamCondition>],
) -> RamNode {
    for idx in (0..positives.len()).rev() {
        let atom = positives[idx];
        let arity = arities[atom.relation.as_str()];
        let source_name = atom_source(idx, atom.relation.as_str());
        node = RamNode::Scan {
            relation: RelationRef::new(source_name, arity),
            tuple_id: idx,
            body: Box::new(node),
        };
        for cond in local_filters[idx].drain(..).rev() {
            node = RamNode::Filter {
                condition: cond,
                body: Box::new(node),
            };
        }
    }
    node
}

fn lower_constraint(
    c: &Constraint,
    bindings: &Bindings,
    symtab: &SymbolTable,
) -> Result<RamCondition, RamError> {
    let (op, l, r) = match c {
        Constraint::NotEqual(l, r) => (CompareOp::Ne, l, r),
        Constraint::LessThan(l, r) => (CompareOp::Lt, l, r),
        Constraint::LessOrEqual(l, r) => (CompareOp::Le, l, r),
        Constraint::GreaterThan(l, r) => (CompareOp::Gt, l, r),
        Constraint::GreaterOrEqual(l, r) => (CompareOp::Ge, l, r),
        Constraint::Equal(l, r) => (CompareOp::Eq, l, r),
    };
    Ok(RamCondition::Comparison(
        op,
        term_to_expr(l, bindings, symtab)?,
        term_to_expr(r, bindings, symtab)?,
    ))
}

fn lower_negation(
    atom: &Atom,
    bindings: &Bindings,
    arities: &HashMap<String, usize>,
    symtab: &SymbolTable,
) -> Result<RamCondition, RamError> {
    let arity = declared_arity(arities, &atom.relation)?;
    let mut pattern: Pattern = vec![None; arity];
    for (col, arg) in atom.args.iter().enumerate() {
        match arg {
            Term::Variable(name) => {
                let (level, bcol) = bindings.get(name).copied().ok_or_else(|| {
                    RamError::Lowering(format!(
                        "negated atom `{}` uses unbound variable `{}`",
                        atom.relation, name
                    ))
                })?;
                pattern[col] = Some(RamExpression::TupleElement { level, col: bcol });
            }
            Term::Placeholder => {}
            Term::Constant(_) | Term::FloatConstant(_) | Term::StringConstant(_) => {
                pattern[col] = Some(const_term_to_expr(arg, symtab)?);
            }
            other => {
                return Err(RamError::Lowering(format!(
                    "unsupported term in negated atom `{}`: {:?}",
                    atom.relation, other
                )))
            }
        }
    }
    // Stratified negation guarantees the negated relation belongs to a
    // strictly lower, already-fully-evaluated stratum: it is always read
    // under its plain name, never a `$delta`/`$new` substitute.
    Ok(RamCondition::Negation(Box::new(RamCondition::ExistenceCheck(
        RelationRef::new(atom.relation.clone(), arity),
        pattern,
    ))))
}

fn term_to_expr(
    t: &Term,
    bindings: &Bindings,
    symtab: &SymbolTable,
) -> Result<RamExpression, RamError> {
    match t {
        Term::Variable(name) => bindings
            .get(name)
            .map(|&(level, col)| RamExpression::TupleElement { level, col })
            .ok_or_else(|| RamError::Lowering(format!("unbound variable `{name}`"))),
        Term::Constant(_) | Term::FloatConstant(_) | Term::StringConstant(_) => {
            const_term_to_expr(t, symtab)
        }
        Term::Arithmetic(expr) => lower_arith(expr, bindings),
        Term::Placeholder => Err(RamError::Lowering(
            "`_` cannot appear in a head or constraint position".into(),
        )),
        Term::Aggregate(_, _) => Err(RamError::Lowering(
            "an aggregate term may only be the sole head argument of its rule".into(),
        )),
        other => Err(RamError::Lowering(format!(
            "term not supported by the RAM translator: {other:?}"
        ))),
    }
}

fn const_term_to_expr(t: &Term, symtab: &SymbolTable) -> Result<RamExpression, RamError> {
    match t {
        Term::Constant(i) => Ok(RamExpression::Constant(Value::Int(*i))),
        Term::FloatConstant(f) => Ok(RamExpression::Constant(Value::float(*f))),
        Term::StringConstant(s) => Ok(RamExpression::Constant(Value::Symbol(symtab.intern(s)))),
        other => Err(RamError::Lowering(format!(
            "expected a constant term, got {other:?}"
        ))),
    }
}

fn lower_arith(expr: &ArithExpr, bindings: &Bindings) -> Result<RamExpression, RamError> {
    match expr {
        ArithExpr::Variable(name) => bindings
            .get(name)
            .map(|&(level, col)| RamExpression::TupleElement { level, col })
            .ok_or_else(|| {
                RamError::Lowering(format!(
                    "unbound variable `{name}` in arithmetic expression"
                ))
            }),
        ArithExpr::Constant(i) => Ok(RamExpression::Constant(Value::Int(*i))),
        ArithExpr::Binary { op, left, right } => Ok(RamExpression::BinaryOp {
            op: lower_arith_op(*op),
            left: Box::new(lower_arith(left, bindings)?),
            right: Box::new(lower_arith(right, bindings)?),
        }),
    }
}

fn lower_arith_op(op: ArithOp) -> BinOp {
    match op {
        ArithOp::Add => BinOp::Add,
        ArithOp::Sub => BinOp::Sub,
        ArithOp::Mul => BinOp::Mul,
        ArithOp::Div => BinOp::Div,
        ArithOp::Mod => BinOp::Mod,
    }
}

/// Aggregate rules (`sum1(v) :- v = sum y : s(1, y).`, represented as a
/// single `Term::Aggregate` head argument) lower to a `RamNode::Aggregate`
/// candidate loop over their last body atom; any earlier atoms form an
/// ordinary join nest whose bindings become pattern bounds on that loop,
/// correlating the aggregate with its enclosing scan. Grouped aggregation
/// (extra plain variables alongside the aggregate in the head) is not
/// supported -- see DESIGN.md.
fn lower_aggregate_rule(
    rule: &Rule,
    positives: &[&Atom],
    arities: &HashMap<String, usize>,
    atom_source: &dyn Fn(usize, &str) -> String,
    symtab: &SymbolTable,
    target: &RelationRef,
) -> Result<RamNode, RamError> {
    let (func, var) = match &rule.head.args[0] {
        Term::Aggregate(f, v) => (*f, v.clone()),
        _ => unreachable!("caller only dispatches here for an aggregate head"),
    };
    let op = match func {
        AggregateFunc::Count => AggregateOp::Count,
        AggregateFunc::Sum => AggregateOp::Sum,
        AggregateFunc::Min => AggregateOp::Min,
        AggregateFunc::Max => AggregateOp::Max,
        _ => {
            return Err(RamError::Lowering(format!(
                "{func:?} has no RAM reducer: only count/sum/min/max lower to an Aggregate node"
            )))
        }
    };

    if positives.is_empty() {
        return Err(RamError::Lowering(
            "aggregate rule has no body atom to range over".into(),
        ));
    }
    let (outer, last) = positives.split_at(positives.len() - 1);
    let agg_atom = last[0];
    let agg_idx = outer.len();

    let mut bindings: Bindings = HashMap::new();
    let mut local_filters: Vec<Vec<RamCondition>> = vec![Vec::new(); outer.len()];
    for (idx, atom) in outer.iter().enumerate() {
        declared_arity(arities, &atom.relation)?;
        for (col, arg) in atom.args.iter().enumerate() {
            bind_body_term(arg, idx, col, &mut bindings, &mut local_filters[idx], symtab)?;
        }
    }

    let agg_arity = declared_arity(arities, &agg_atom.relation)?;
    let mut pattern: Pattern = vec![None; agg_arity];
    let mut target_col = None;
    let mut seen_in_agg: HashMap<&str, usize> = HashMap::new();
    for (col, arg) in agg_atom.args.iter().enumerate() {
        match arg {
            Term::Variable(name) if *name == var => {
                if target_col.is_some() {
                    return Err(RamError::Lowering(format!(
                        "aggregated variable `{var}` must appear exactly once in `{}`",
                        agg_atom.relation
                    )));
                }
                target_col = Some(col);
            }
            Term::Variable(name) => {
                if let Some(&(lvl, c)) = bindings.get(name) {
                    pattern[col] = Some(RamExpression::TupleElement { level: lvl, col: c });
                } else if !seen_in_agg.contains_key(name.as_str()) {
                    seen_in_agg.insert(name.as_str(), col);
                }
                // A variable repeated only within this atom (not bound by
                // an outer atom) is left unbound here -- a known gap, see
                // DESIGN.md.
            }
            Term::Placeholder => {}
            _ => pattern[col] = Some(const_term_to_expr(arg, symtab)?),
        }
    }
    let target_col = target_col.ok_or_else(|| {
        RamError::Lowering(format!(
            "aggregated variable `{var}` does not appear in `{}`",
            agg_atom.relation
        ))
    })?;

    let agg_source = atom_source(agg_idx, agg_atom.relation.as_str());
    let mut node = RamNode::Aggregate {
        relation: RelationRef::new(agg_source, agg_arity),
        tuple_id: agg_idx,
        func: op,
        target: RamExpression::TupleElement {
            level: agg_idx,
            col: target_col,
        },
        pattern,
        body: Box::new(RamNode::Project {
            relation: target.clone(),
            values: vec![RamExpression::TupleElement { level: agg_idx, col: 0 }],
        }),
    };
    node = wrap_scans(node, outer, arities, atom_source, &mut local_filters);
    Ok(node)
}
