//! # LVM Compiler
//!
//! Single-pass, post-order lowering of a (transformed) `RamNode` tree into
//! flat LVM bytecode (spec.md §4.4). Branch targets that aren't known until
//! their continuation has been emitted (loop exits, search-loop ends,
//! parallel joins) are back-patched once the real address is known, via
//! `Opcode::patch`.

use thiserror::Error;

use crate::lvm::opcode::{decode, Addr, Opcode};
use crate::ram::node::{
    AggregateOp, BinOp, CompareOp, Pattern, RamCondition, RamExpression, RamNode, RelationRef,
};
use crate::symbol_table::{SymbolId, SymbolTable};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("Exit node outside of any enclosing Loop")]
    ExitOutsideLoop,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("instruction at {addr} decodes past the end of the code buffer")]
    TruncatedInstruction { addr: Addr },
    #[error("branch target {target} (from instruction at {from}) is not a valid instruction boundary")]
    InvalidBranchTarget { from: Addr, target: Addr },
    #[error("code buffer does not end on an instruction boundary")]
    Misaligned,
}

/// A compiled program plus the side tables the evaluator and disassembler
/// need: source-location annotations (spec.md §6's "parallel vector of
/// source-location records keyed by code offset") and the interned symbol
/// table so relation/message names can be resolved back from `SymbolId`s.
#[derive(Debug, Clone)]
pub struct LvmProgram {
    pub code: Vec<i64>,
    pub debug_locations: Vec<(Addr, String)>,
    pub entry: Addr,
}

pub fn compile(program: &RamNode, symtab: &SymbolTable) -> Result<LvmProgram, CompileError> {
    let mut c = Compiler {
        code: Vec::new(),
        debug_locations: Vec::new(),
        symtab,
        loop_exit_patches: Vec::new(),
    };
    c.emit_node(program)?;
    Opcode::Stop.emit(&mut c.code);
    Ok(LvmProgram {
        code: c.code,
        debug_locations: c.debug_locations,
        entry: 0,
    })
}

struct Compiler<'a> {
    code: Vec<i64>,
    debug_locations: Vec<(Addr, String)>,
    symtab: &'a SymbolTable,
    /// One entry per enclosing `Loop`; holds the addresses of `Jmpnz`
    /// placeholders emitted for `Exit` nodes within it, patched to the
    /// address right after the loop once its body is fully compiled.
    loop_exit_patches: Vec<Vec<Addr>>,
}

impl<'a> Compiler<'a> {
    fn rel_sym(&self, relation: &RelationRef) -> SymbolId {
        self.symtab.intern(&relation.name)
    }

    fn emit(&mut self, op: Opcode) -> Addr {
        op.emit(&mut self.code)
    }

    fn patch(&mut self, addr: Addr, op: Opcode) {
        op.patch(&mut self.code, addr);
    }

    fn emit_node(&mut self, node: &RamNode) -> Result<(), CompileError> {
        match node {
            RamNode::Scan {
                relation,
                tuple_id,
                body,
            } => {
                self.emit_scan_nest(relation, *tuple_id, None, |c| c.emit_node(body))?;
            }
            RamNode::IndexScan {
                relation,
                tuple_id,
                pattern,
                body,
            } => {
                self.emit_scan_nest(relation, *tuple_id, Some(pattern), |c| c.emit_node(body))?;
            }
            RamNode::Filter { condition, body } => {
                self.emit_condition(condition);
                let placeholder = self.emit(Opcode::Jmpez(0));
                self.emit_node(body)?;
                let end = self.code.len();
                self.patch(placeholder, Opcode::Jmpez(end));
            }
            RamNode::Project { relation, values } => {
                for v in values {
                    self.emit_expr(v);
                }
                self.emit(Opcode::Project {
                    arity: values.len() as u32,
                    relation: self.rel_sym(relation),
                });
            }
            RamNode::Aggregate {
                relation,
                tuple_id,
                func,
                target,
                pattern,
                body,
            } => {
                self.emit(Opcode::AggInit {
                    slot: *tuple_id as u32,
                    func: *func,
                });
                let pat = if pattern.iter().any(Option::is_some) {
                    Some(pattern)
                } else {
                    None
                };
                self.emit_scan_nest(relation, *tuple_id, pat, |c| {
                    c.emit_expr(target);
                    c.emit(Opcode::AggStep {
                        slot: *tuple_id as u32,
                        func: *func,
                    });
                    Ok(())
                })?;
                self.emit(Opcode::AggFinish {
                    slot: *tuple_id as u32,
                    func: *func,
                });
                self.emit_node(body)?;
            }
            RamNode::UnpackRecord {
                expr,
                arity,
                tuple_id,
                body,
            } => {
                self.emit_expr(expr);
                self.emit(Opcode::UnpackRecord {
                    arity: *arity as u32,
                    out_level: *tuple_id as u32,
                });
                self.emit_node(body)?;
            }
            RamNode::Sequence(nodes) => {
                for n in nodes {
                    self.emit_node(n)?;
                }
            }
            RamNode::Parallel(nodes) => {
                let parallel_addr = self.emit(Opcode::Parallel(vec![0; nodes.len()]));
                let mut branch_addrs = Vec::with_capacity(nodes.len());
                let mut join_patches = Vec::with_capacity(nodes.len());
                for n in nodes {
                    branch_addrs.push(self.code.len());
                    self.emit_node(n)?;
                    join_patches.push(self.emit(Opcode::StopParallel(0)));
                }
                let join_addr = self.code.len();
                self.patch(parallel_addr, Opcode::Parallel(branch_addrs));
                for p in join_patches {
                    self.patch(p, Opcode::StopParallel(join_addr));
                }
            }
            RamNode::Loop(body) => {
                let top = self.code.len();
                self.loop_exit_patches.push(Vec::new());
                self.emit_node(body)?;
                self.emit(Opcode::IncIterationNumber);
                self.emit(Opcode::Goto(top));
                let after = self.code.len();
                let patches = self.loop_exit_patches.pop().expect("pushed above");
                for p in patches {
                    self.patch(p, Opcode::Jmpnz(after));
                }
            }
            RamNode::Exit(condition) => {
                self.emit_condition(condition);
                let placeholder = self.emit(Opcode::Jmpnz(0));
                self.loop_exit_patches
                    .last_mut()
                    .ok_or(CompileError::ExitOutsideLoop)?
                    .push(placeholder);
            }
            RamNode::Stratum { body, .. } => {
                self.emit_node(body)?;
            }
            RamNode::Query(body) => {
                self.emit_node(body)?;
            }
            RamNode::Create {
                relation,
                storage_kind,
                attr_types,
            } => {
                self.emit(Opcode::Create {
                    relation: self.rel_sym(relation),
                    arity: relation.arity as u32,
                    storage_kind: *storage_kind,
                    attr_types: attr_types.clone(),
                });
            }
            RamNode::Clear(r) => {
                self.emit(Opcode::Clear {
                    relation: self.rel_sym(r),
                });
            }
            RamNode::Drop(r) => {
                self.emit(Opcode::Drop {
                    relation: self.rel_sym(r),
                });
            }
            RamNode::Load { relation, io_index } => {
                self.emit(Opcode::Load {
                    relation: self.rel_sym(relation),
                    io_index: *io_index as u32,
                });
            }
            RamNode::Store { relation, io_index } => {
                self.emit(Opcode::Store {
                    relation: self.rel_sym(relation),
                    io_index: *io_index as u32,
                });
            }
            RamNode::Merge { target, source } => {
                self.emit(Opcode::Merge {
                    target: self.rel_sym(target),
                    source: self.rel_sym(source),
                });
            }
            RamNode::Swap { a, b } => {
                self.emit(Opcode::Swap {
                    a: self.rel_sym(a),
                    b: self.rel_sym(b),
                });
            }
            RamNode::Fact { relation, values } => {
                for v in values {
                    self.emit_expr(v);
                }
                self.emit(Opcode::Fact {
                    arity: values.len() as u32,
                    relation: self.rel_sym(relation),
                });
            }
            RamNode::LogSize(r) => {
                self.emit(Opcode::LogSize {
                    relation: self.rel_sym(r),
                });
            }
            RamNode::LogTimer { message, body } => {
                self.debug_locations
                    .push((self.code.len(), format!("timer start: {message}")));
                self.emit_node(body)?;
                self.debug_locations
                    .push((self.code.len(), format!("timer stop: {message}")));
            }
            RamNode::DebugInfo { message, body } => {
                self.debug_locations.push((self.code.len(), message.clone()));
                self.emit_node(body)?;
            }
            RamNode::ResetIterationNumber => {
                self.emit(Opcode::ResetIterationNumber);
            }
            RamNode::Nop => {
                self.emit(Opcode::Nop);
            }
        }
        Ok(())
    }

    /// Shared shape for `Scan`/`IndexScan`/`Aggregate`'s candidate loop:
    /// allocate an iterator, loop while not at end, bind the current tuple,
    /// run `on_iter`, advance, repeat.
    fn emit_scan_nest(
        &mut self,
        relation: &RelationRef,
        tuple_id: usize,
        pattern: Option<&Pattern>,
        on_iter: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let rel_sym = self.rel_sym(relation);
        match pattern {
            None => {
                self.emit(Opcode::IterScan {
                    relation: rel_sym,
                    slot: tuple_id as u32,
                });
            }
            Some(pattern) => {
                let mut mask = 0u32;
                for (col, bound) in pattern.iter().enumerate() {
                    if let Some(expr) = bound {
                        self.emit_expr(expr);
                        mask |= 1 << col;
                    }
                }
                self.emit(Opcode::IterIndexScan {
                    relation: rel_sym,
                    slot: tuple_id as u32,
                    bound_mask: mask,
                });
            }
        }

        let top = self.code.len();
        self.emit(Opcode::IterNotAtEnd {
            slot: tuple_id as u32,
        });
        let placeholder = self.emit(Opcode::Jmpez(0));
        self.emit(Opcode::IterSelect {
            slot: tuple_id as u32,
            out_level: tuple_id as u32,
        });
        on_iter(self)?;
        self.emit(Opcode::IterInc {
            slot: tuple_id as u32,
        });
        self.emit(Opcode::Goto(top));
        let end = self.code.len();
        self.patch(placeholder, Opcode::Jmpez(end));
        Ok(())
    }

    fn emit_expr(&mut self, expr: &RamExpression) {
        match expr {
            RamExpression::Constant(v) => {
                self.emit(Opcode::Number(*v));
            }
            RamExpression::TupleElement { level, col } => {
                self.emit(Opcode::ElementAccess {
                    level: *level as u32,
                    col: *col as u32,
                });
            }
            RamExpression::AutoIncrement => {
                self.emit(Opcode::AutoIncrement);
            }
            RamExpression::BinaryOp { op, left, right } => {
                self.emit_expr(left);
                self.emit_expr(right);
                self.emit(match op {
                    BinOp::Add => Opcode::Add,
                    BinOp::Sub => Opcode::Sub,
                    BinOp::Mul => Opcode::Mul,
                    BinOp::Div => Opcode::Div,
                    BinOp::Mod => Opcode::Mod,
                });
            }
            RamExpression::Negate(inner) => {
                self.emit_expr(inner);
                self.emit(Opcode::Neg);
            }
            RamExpression::PackRecord(fields) => {
                for f in fields {
                    self.emit_expr(f);
                }
                self.emit(Opcode::PackRecord {
                    arity: fields.len() as u32,
                });
            }
        }
    }

    fn emit_condition(&mut self, cond: &RamCondition) {
        match cond {
            RamCondition::True => {
                self.emit(Opcode::Number(crate::ram::value::Value::Int(1)));
            }
            RamCondition::False => {
                self.emit(Opcode::Number(crate::ram::value::Value::Int(0)));
            }
            RamCondition::Conjunction(a, b) => {
                self.emit_condition(a);
                self.emit_condition(b);
                self.emit(Opcode::And);
            }
            RamCondition::Negation(inner) => {
                self.emit_condition(inner);
                self.emit(Opcode::Not);
            }
            RamCondition::Comparison(op, left, right) => {
                self.emit_expr(left);
                self.emit_expr(right);
                self.emit(match op {
                    CompareOp::Eq => Opcode::CmpEq,
                    CompareOp::Ne => Opcode::CmpNe,
                    CompareOp::Lt => Opcode::CmpLt,
                    CompareOp::Le => Opcode::CmpLe,
                    CompareOp::Gt => Opcode::CmpGt,
                    CompareOp::Ge => Opcode::CmpGe,
                });
            }
            RamCondition::EmptinessCheck(r) => {
                self.emit(Opcode::EmptinessCheck {
                    relation: self.rel_sym(r),
                });
            }
            RamCondition::ExistenceCheck(r, pattern) => {
                let mask = self.emit_pattern_bounds(pattern);
                self.emit(Opcode::ExistenceCheck {
                    relation: self.rel_sym(r),
                    bound_mask: mask,
                });
            }
            RamCondition::ProvenanceExistenceCheck(r, pattern, level_expr) => {
                let mask = self.emit_pattern_bounds(pattern);
                self.emit_expr(level_expr);
                self.emit(Opcode::ProvenanceExistenceCheck {
                    relation: self.rel_sym(r),
                    bound_mask: mask,
                });
            }
        }
    }

    fn emit_pattern_bounds(&mut self, pattern: &Pattern) -> u32 {
        let mut mask = 0u32;
        for (col, bound) in pattern.iter().enumerate() {
            if let Some(expr) = bound {
                self.emit_expr(expr);
                mask |= 1 << col;
            }
        }
        mask
    }
}

/// Decode the full buffer, checking every branch target lands on an
/// instruction boundary the decoder itself visits (spec.md §8 invariant 2:
/// "every compiled program passes a structural verifier before execution").
pub fn verify(program: &LvmProgram) -> Result<(), VerifyError> {
    let code = &program.code;
    let mut boundaries = std::collections::HashSet::new();
    let mut ip = 0;
    while ip < code.len() {
        boundaries.insert(ip);
        if ip >= code.len() {
            return Err(VerifyError::TruncatedInstruction { addr: ip });
        }
        let (_, next) = decode(code, ip);
        if next > code.len() {
            return Err(VerifyError::TruncatedInstruction { addr: ip });
        }
        ip = next;
    }
    if ip != code.len() {
        return Err(VerifyError::Misaligned);
    }
    boundaries.insert(code.len());

    let mut ip = 0;
    while ip < code.len() {
        let (op, next) = decode(code, ip);
        let targets: Vec<Addr> = match &op {
            Opcode::Goto(t) | Opcode::Jmpnz(t) | Opcode::Jmpez(t) | Opcode::StopParallel(t) => {
                vec![*t]
            }
            Opcode::Parallel(addrs) => addrs.clone(),
            _ => Vec::new(),
        };
        for t in targets {
            if !boundaries.contains(&t) {
                return Err(VerifyError::InvalidBranchTarget { from: ip, target: t });
            }
        }
        ip = next;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::node::{RelationRef, StorageKind};
    use crate::ram::value::Value;

    fn symtab() -> SymbolTable {
        SymbolTable::default()
    }

    #[test]
    fn compiles_project_of_a_fact() {
        let st = symtab();
        let program = RamNode::Sequence(vec![
            RamNode::Create {
                relation: RelationRef::new("p", 1),
                storage_kind: StorageKind::BTree,
                attr_types: vec![crate::value::DataType::Int64],
            },
            RamNode::Project {
                relation: RelationRef::new("p", 1),
                values: vec![RamExpression::Constant(Value::Int(1))],
            },
        ]);
        let compiled = compile(&program, &st).unwrap();
        verify(&compiled).unwrap();
        let (last_op, next) = decode(&compiled.code, {
            // walk to the final instruction boundary
            let mut ip = 0;
            let mut prev = 0;
            while ip < compiled.code.len() {
                prev = ip;
                let (_, n) = decode(&compiled.code, ip);
                ip = n;
            }
            prev
        });
        assert_eq!(last_op, Opcode::Stop);
        assert_eq!(next, compiled.code.len());
    }

    #[test]
    fn scan_loop_branches_land_on_valid_boundaries() {
        let st = symtab();
        let scan = RamNode::Scan {
            relation: RelationRef::new("r", 1),
            tuple_id: 0,
            body: Box::new(RamNode::Project {
                relation: RelationRef::new("q", 1),
                values: vec![RamExpression::TupleElement { level: 0, col: 0 }],
            }),
        };
        let program = RamNode::Query(Box::new(scan));
        let compiled = compile(&program, &st).unwrap();
        verify(&compiled).unwrap();
    }

    #[test]
    fn exit_outside_loop_is_rejected() {
        let st = symtab();
        let program = RamNode::Exit(RamCondition::True);
        assert_eq!(compile(&program, &st), Err(CompileError::ExitOutsideLoop));
    }

    #[test]
    fn loop_exit_targets_the_address_after_the_loop() {
        let st = symtab();
        let loop_body = RamNode::Sequence(vec![
            RamNode::Project {
                relation: RelationRef::new("p", 0),
                values: vec![],
            },
            RamNode::Exit(RamCondition::True),
        ]);
        let program = RamNode::Loop(Box::new(loop_body));
        let compiled = compile(&program, &st).unwrap();
        verify(&compiled).unwrap();
    }

    #[test]
    fn parallel_join_addresses_all_match() {
        let st = symtab();
        let program = RamNode::Parallel(vec![
            RamNode::Project {
                relation: RelationRef::new("p", 0),
                values: vec![],
            },
            RamNode::Project {
                relation: RelationRef::new("q", 0),
                values: vec![],
            },
        ]);
        let compiled = compile(&program, &st).unwrap();
        verify(&compiled).unwrap();
    }
}
