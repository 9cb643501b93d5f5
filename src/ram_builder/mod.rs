//! # RAM Builder
//!
//! Lowers a parsed `datalog_ast::Program` straight into an untransformed
//! `RamNode` tree -- the one seam where this crate's in-scope RAM/LVM core
//! meets the externally-owned AST (surface syntax, the AST-level type
//! system, and fact-file readers are out of scope; see SPEC_FULL.md). The
//! output still needs `ram::transform::pipeline` before it's handed to the
//! LVM compiler.
//!
//! Per relation, by ascending stratum (`recursion::DependencyGraph`):
//! - Every relation gets one `Create`.
//! - Zero-body rules (facts) become `Fact` nodes.
//! - A stratum with no internal recursion runs its rules once, in program
//!   order, inside a `Query`.
//! - A recursive stratum runs full semi-naive evaluation: per-relation
//!   `$delta`/`$new` companions, a base-case seed into `$delta` merged into
//!   the relation, then a `Loop` that clears `$new`, re-derives into it
//!   (reading `$delta` at exactly one body-atom position per rule variant,
//!   the rest at their full relation), exits once every `$new` in the
//!   stratum is empty, else merges `$new` into the relation and swaps
//!   `$new`/`$delta` for the next round.
//!
//! This always builds a full semi-naive loop, even for a stratum with a
//! single non-recursive rule -- a uniformity trade documented in
//! DESIGN.md: one extra empty-`$new` iteration per such stratum, in
//! exchange for a single assembly path instead of two.

mod rule;

use std::collections::{BTreeMap, HashMap, HashSet};

use datalog_ast::{BodyPredicate, Program, Rule};

use crate::ram::error::RamError;
use crate::ram::node::{RamCondition, RamNode, RelationRef, StorageKind};
use crate::recursion::DependencyGraph;
use crate::symbol_table::SymbolTable;
use crate::value::DataType;

/// Lower `program` into a single `RamNode::Sequence` covering every
/// stratum. `symtab` interns any string-constant terms encountered along
/// the way (relation names themselves are plain strings at this layer;
/// the LVM compiler interns those separately).
pub fn build_program(program: &Program, symtab: &SymbolTable) -> Result<RamNode, RamError> {
    let arities = infer_arities(program)?;

    let graph = DependencyGraph::from_program(program);
    let strata = graph
        .stratify()
        .map_err(|e| RamError::Lowering(e.to_string()))?;

    let mut by_stratum: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (relation, stratum) in &strata {
        by_stratum.entry(*stratum).or_default().push(relation.clone());
    }
    for names in by_stratum.values_mut() {
        names.sort();
    }

    let mut seq: Vec<RamNode> = Vec::new();

    for names in by_stratum.values() {
        for name in names {
            seq.push(create_node(name, arities[name.as_str()]));
        }
    }

    for names in by_stratum.values() {
        for name in names {
            for rule in program
                .rules
                .iter()
                .filter(|r| r.body.is_empty() && &r.head.relation == name)
            {
                seq.push(rule::build_fact(rule, symtab)?);
            }
        }
    }

    for (stratum_idx, names) in &by_stratum {
        if let Some(node) = build_stratum(*stratum_idx, names, program, &arities, symtab)? {
            seq.push(node);
        }
    }

    Ok(RamNode::Sequence(seq))
}

fn infer_arities(program: &Program) -> Result<HashMap<String, usize>, RamError> {
    let mut arities: HashMap<String, usize> = HashMap::new();
    for rule in &program.rules {
        note_arity(&mut arities, &rule.head.relation, rule.head.args.len())?;
        for pred in &rule.body {
            let atom = pred.atom();
            note_arity(&mut arities, &atom.relation, atom.args.len())?;
        }
    }
    Ok(arities)
}

fn note_arity(
    arities: &mut HashMap<String, usize>,
    name: &str,
    arity: usize,
) -> Result<(), RamError> {
    match arities.get(name) {
        Some(&existing) if existing != arity => Err(RamError::Lowering(format!(
            "relation `{name}` used with inconsistent arities: {existing} and {arity}"
        ))),
        Some(_) => Ok(()),
        None => {
            arities.insert(name.to_string(), arity);
            Ok(())
        }
    }
}

fn create_node(name: &str, arity: usize) -> RamNode {
    RamNode::Create {
        relation: RelationRef::new(name, arity),
        storage_kind: StorageKind::BTree,
        attr_types: vec![DataType::Int64; arity],
    }
}

fn delta_name(name: &str) -> String {
    format!("{name}$delta")
}

fn new_name(name: &str) -> String {
    format!("{name}$new")
}

fn build_stratum(
    stratum_idx: usize,
    names: &[String],
    program: &Program,
    arities: &HashMap<String, usize>,
    symtab: &SymbolTable,
) -> Result<Option<RamNode>, RamError> {
    let stratum_set: HashSet<&str> = names.iter().map(|s| s.as_str()).collect();
    let derivation_rules: Vec<&Rule> = program
        .rules
        .iter()
        .filter(|r| !r.body.is_empty() && stratum_set.contains(r.head.relation.as_str()))
        .collect();
    if derivation_rules.is_empty() {
        return Ok(None);
    }

    let recursive = derivation_rules.iter().any(|r| {
        r.body.iter().any(
            |p| matches!(p, BodyPredicate::Positive(a) if stratum_set.contains(a.relation.as_str())),
        )
    });

    if !recursive {
        let mut body = Vec::new();
        for r in &derivation_rules {
            let target = RelationRef::new(r.head.relation.clone(), arities[r.head.relation.as_str()]);
            body.push(rule::lower_rule(
                r,
                arities,
                &|_, name: &str| name.to_string(),
                symtab,
                &target,
            )?);
        }
        return Ok(Some(RamNode::Stratum {
            index: stratum_idx,
            body: Box::new(RamNode::Query(Box::new(RamNode::Sequence(body)))),
        }));
    }

    let mut stratum_body: Vec<RamNode> = Vec::new();
    for name in names {
        let arity = arities[name.as_str()];
        stratum_body.push(create_node(&delta_name(name), arity));
        stratum_body.push(create_node(&new_name(name), arity));
    }

    let mut seed_nodes: Vec<RamNode> = Vec::new();
    let mut step_nodes: Vec<RamNode> = Vec::new();

    for r in &derivation_rules {
        let positive_positions_in_stratum: Vec<usize> = r
            .body
            .iter()
            .filter(|p| matches!(p, BodyPredicate::Positive(_)))
            .enumerate()
            .filter(|(_, p)| {
                matches!(p, BodyPredicate::Positive(a) if stratum_set.contains(a.relation.as_str()))
            })
            .map(|(i, _)| i)
            .collect();

        let head_arity = arities[r.head.relation.as_str()];
        if positive_positions_in_stratum.is_empty() {
            let target = RelationRef::new(delta_name(&r.head.relation), head_arity);
            seed_nodes.push(rule::lower_rule(
                r,
                arities,
                &|_, name: &str| name.to_string(),
                symtab,
                &target,
            )?);
        } else {
            for &pos in &positive_positions_in_stratum {
                let target = RelationRef::new(new_name(&r.head.relation), head_arity);
                let src = move |i: usize, name: &str| -> String {
                    if i == pos {
                        delta_name(name)
                    } else {
                        name.to_string()
                    }
                };
                step_nodes.push(rule::lower_rule(r, arities, &src, symtab, &target)?);
            }
        }
    }

    let seed_merges: Vec<RamNode> = names
        .iter()
        .map(|n| RamNode::Merge {
            target: RelationRef::new(n.clone(), arities[n.as_str()]),
            source: RelationRef::new(delta_name(n), arities[n.as_str()]),
        })
        .collect();

    let new_clears: Vec<RamNode> = names
        .iter()
        .map(|n| RamNode::Clear(RelationRef::new(new_name(n), arities[n.as_str()])))
        .collect();

    let exit_cond = names
        .iter()
        .map(|n| RamCondition::EmptinessCheck(RelationRef::new(new_name(n), arities[n.as_str()])))
        .reduce(|acc, c| RamCondition::Conjunction(Box::new(acc), Box::new(c)))
        .expect("a recursive stratum always names at least one relation");

    let merges: Vec<RamNode> = names
        .iter()
        .map(|n| RamNode::Merge {
            target: RelationRef::new(n.clone(), arities[n.as_str()]),
            source: RelationRef::new(new_name(n), arities[n.as_str()]),
        })
        .collect();
    let swaps: Vec<RamNode> = names
        .iter()
        .map(|n| RamNode::Swap {
            a: RelationRef::new(new_name(n), arities[n.as_str()]),
            b: RelationRef::new(delta_name(n), arities[n.as_str()]),
        })
        .collect();

    let mut loop_body = new_clears;
    loop_body.push(RamNode::Query(Box::new(RamNode::Sequence(step_nodes))));
    loop_body.push(RamNode::Exit(exit_cond));
    loop_body.extend(merges);
    loop_body.extend(swaps);

    stratum_body.push(RamNode::Query(Box::new(RamNode::Sequence(seed_nodes))));
    stratum_body.extend(seed_merges);
    stratum_body.push(RamNode::Loop(Box::new(RamNode::Sequence(loop_body))));
    stratum_body.push(RamNode::ResetIterationNumber);

    Ok(Some(RamNode::Stratum {
        index: stratum_idx,
        body: Box::new(RamNode::Sequence(stratum_body)),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalog_ast::{Atom, Program, Rule, Term};

    fn var(name: &str) -> Term {
        Term::Variable(name.to_string())
    }

    fn atom(relation: &str, args: Vec<Term>) -> Atom {
        Atom {
            relation: relation.to_string(),
            args,
        }
    }

    fn fact(relation: &str, args: Vec<Term>) -> Rule {
        Rule::new_simple(atom(relation, args), vec![], vec![])
    }

    fn symtab() -> SymbolTable {
        SymbolTable::new()
    }

    #[test]
    fn non_recursive_program_creates_and_projects_without_a_loop() {
        let program = Program {
            rules: vec![
                fact("edge", vec![Term::Constant(1), Term::Constant(2)]),
                Rule::new_simple(
                    atom("path", vec![var("x"), var("y")]),
                    vec![atom("edge", vec![var("x"), var("y")])],
                    vec![],
                ),
            ],
        };
        let ram = build_program(&program, &symtab()).expect("builds");
        let RamNode::Sequence(top) = ram else {
            panic!("expected a top-level sequence")
        };
        assert!(top.iter().any(|n| matches!(n, RamNode::Create { .. })));
        assert!(top.iter().any(|n| matches!(n, RamNode::Fact { .. })));
        assert!(top
            .iter()
            .all(|n| !matches!(n, RamNode::Stratum { body, .. } if contains_loop(body))));
    }

    fn contains_loop(node: &RamNode) -> bool {
        match node {
            RamNode::Loop(_) => true,
            RamNode::Sequence(nodes) | RamNode::Parallel(nodes) => nodes.iter().any(contains_loop),
            RamNode::Stratum { body, .. }
            | RamNode::Query(body)
            | RamNode::LogTimer { body, .. }
            | RamNode::DebugInfo { body, .. } => contains_loop(body),
            _ => false,
        }
    }

    #[test]
    fn recursive_transitive_closure_builds_a_semi_naive_loop() {
        let program = Program {
            rules: vec![
                fact("edge", vec![Term::Constant(1), Term::Constant(2)]),
                fact("edge", vec![Term::Constant(2), Term::Constant(3)]),
                Rule::new_simple(
                    atom("tc", vec![var("x"), var("y")]),
                    vec![atom("edge", vec![var("x"), var("y")])],
                    vec![],
                ),
                Rule::new_simple(
                    atom("tc", vec![var("x"), var("z")]),
                    vec![
                        atom("tc", vec![var("x"), var("y")]),
                        atom("edge", vec![var("y"), var("z")]),
                    ],
                    vec![],
                ),
            ],
        };
        let ram = build_program(&program, &symtab()).expect("builds");
        let RamNode::Sequence(top) = ram else {
            panic!("expected a top-level sequence")
        };
        let stratum = top
            .iter()
            .find_map(|n| match n {
                RamNode::Stratum { body, .. } if contains_loop(body) => Some(body.as_ref()),
                _ => None,
            })
            .expect("recursive stratum present");
        assert!(contains_loop(stratum));
    }

    #[test]
    fn inconsistent_arity_is_rejected() {
        let program = Program {
            rules: vec![
                fact("edge", vec![Term::Constant(1), Term::Constant(2)]),
                fact("edge", vec![Term::Constant(1)]),
            ],
        };
        assert!(build_program(&program, &symtab()).is_err());
    }
}
