//! # LVM Evaluator
//!
//! A stack-machine interpreter over `lvm::compiler::LvmProgram`. `evaluate`
//! is the library entrypoint; everything else here is the interpreter's
//! internals: the relation store (`relation`), tuple iterators (`iter`),
//! per-query state (`context`), `Parallel` dispatch (`parallel`), and the
//! error/status types (`error`).

pub mod context;
pub mod error;
pub mod iter;
pub mod parallel;
pub mod relation;

pub use error::{EvalError, Status};
pub use relation::{Relation, RelationManager};

use std::collections::HashMap;

use crate::execution::{CancelHandle, ResourceLimits};
use crate::lvm::compiler::LvmProgram;
use crate::lvm::opcode::{decode, Addr, Opcode};
use crate::ram::value::{Tuple, Value};
use crate::record_pool::RecordPool;
use crate::symbol_table::{SymbolId, SymbolTable};

use context::EvalContext;
use iter::RelIter;
use parallel::{merge_deltas, AutoIncrementState, DeltaBuffer};

/// Where to read a relation's initial facts from, or write its final
/// contents to, keyed by the `io_index` a `Load`/`Store` opcode carries
/// (spec.md §6 "External interfaces").
#[derive(Debug, Clone)]
pub struct IoDirective {
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct IoDirectiveSet {
    pub load: HashMap<u32, IoDirective>,
    pub store: HashMap<u32, IoDirective>,
}

/// How the interpreter reaches the relation store: directly (sequential
/// code, anywhere outside a `Parallel` block) or through a private delta
/// buffer plus a read-only view (inside one `Parallel` worker).
enum Sink<'a> {
    Direct(&'a mut RelationManager),
    Deferred {
        relations: &'a RelationManager,
        delta: &'a mut DeltaBuffer,
    },
}

fn undeclared(relation: SymbolId) -> EvalError {
    EvalError::UndeclaredRelation(relation.0.to_string())
}

impl<'a> Sink<'a> {
    /// Relation-not-found is a fatal error on every reference (spec.md §4.5,
    /// §7 item 3: "Relation-not-found on any reference is fatal (compiler
    /// bug)"), not a silent no-op/empty-scan/zero-size fallback.
    fn project(&mut self, relation: SymbolId, tuple: Tuple) -> Result<(), EvalError> {
        match self {
            Sink::Direct(rm) => {
                rm.get_mut(relation).ok_or_else(|| undeclared(relation))?.insert(tuple);
                Ok(())
            }
            Sink::Deferred { delta, .. } => {
                delta.record(relation, tuple);
                Ok(())
            }
        }
    }

    fn scan(&mut self, relation: SymbolId) -> Result<Vec<Tuple>, EvalError> {
        match self {
            Sink::Direct(rm) => Ok(rm.get(relation).ok_or_else(|| undeclared(relation))?.scan().cloned().collect()),
            Sink::Deferred { relations, .. } => {
                Ok(relations.get(relation).ok_or_else(|| undeclared(relation))?.scan().cloned().collect())
            }
        }
    }

    fn index_scan(&mut self, relation: SymbolId, mask: u32, bound: &[Value]) -> Result<Vec<Tuple>, EvalError> {
        match self {
            Sink::Direct(rm) => {
                Ok(rm.get_mut(relation).ok_or_else(|| undeclared(relation))?.index_scan(mask, bound))
            }
            Sink::Deferred { relations, .. } => Ok(relations
                .get(relation)
                .ok_or_else(|| undeclared(relation))?
                .index_scan_readonly(mask, bound)),
        }
    }

    fn is_empty(&self, relation: SymbolId) -> Result<bool, EvalError> {
        match self {
            Sink::Direct(rm) => Ok(rm.get(relation).ok_or_else(|| undeclared(relation))?.is_empty()),
            Sink::Deferred { relations, .. } => {
                Ok(relations.get(relation).ok_or_else(|| undeclared(relation))?.is_empty())
            }
        }
    }

    fn size(&self, relation: SymbolId) -> Result<usize, EvalError> {
        match self {
            Sink::Direct(rm) => Ok(rm.get(relation).ok_or_else(|| undeclared(relation))?.len()),
            Sink::Deferred { relations, .. } => Ok(relations.get(relation).ok_or_else(|| undeclared(relation))?.len()),
        }
    }

    fn require_direct(&mut self, addr: Addr) -> Result<&mut RelationManager, EvalError> {
        match self {
            Sink::Direct(rm) => Ok(rm),
            Sink::Deferred { .. } => Err(EvalError::ResourceLimit(format!(
                "relation lifecycle opcode at {addr} is not permitted inside a Parallel branch"
            ))),
        }
    }

    /// A read-only view of the underlying relation store, for spawning
    /// `Parallel` workers (which only ever need shared read access).
    fn relations(&self) -> &RelationManager {
        match self {
            Sink::Direct(rm) => &**rm,
            Sink::Deferred { relations, .. } => *relations,
        }
    }
}

/// Poll the cancel flag roughly every 4096 instructions, plus once per
/// `IncIterationNumber` (spec.md §5 "cooperative cancellation").
const CANCEL_POLL_INTERVAL: u64 = 4096;

struct Interpreter<'a> {
    record_pool: &'a RecordPool,
    symtab: &'a SymbolTable,
    cancel: &'a CancelHandle,
    io: &'a IoDirectiveSet,
    limits: &'a ResourceLimits,
    instructions_since_poll: u64,
}

/// Format is inferred from the directive's path extension; everything else
/// (TSV/CSV-vs-binary framing, actual file I/O) is the storage layer's job
/// -- `Load`/`Store` only own the `ram::Value` <-> `value::Value` boundary.
fn load_relation(
    rm: &mut RelationManager,
    relation: SymbolId,
    directive: &IoDirective,
    symtab: &SymbolTable,
) -> Result<(), crate::storage::StorageError> {
    let (arity, attr_types) = {
        let r = rm.get(relation).expect("Load must follow a Create for this relation");
        (r.arity, r.attr_types.clone())
    };
    let path = std::path::Path::new(&directive.path);
    let (_, storage_tuples) = if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
        crate::storage::load_from_parquet(path)?
    } else {
        crate::storage::load_from_csv(path)?
    };
    let r = rm.get_mut(relation).expect("checked above");
    for st in storage_tuples {
        let mut values = Vec::with_capacity(arity);
        for i in 0..arity {
            let field = st.get(i).cloned().unwrap_or(crate::value::Value::Null);
            values.push(Value::from_storage(&field, symtab));
        }
        let _ = &attr_types;
        r.insert(Tuple::new(values));
    }
    Ok(())
}

fn store_relation(
    rm: &RelationManager,
    relation: SymbolId,
    directive: &IoDirective,
    symtab: &SymbolTable,
) -> Result<(), crate::storage::StorageError> {
    let Some(r) = rm.get(relation) else { return Ok(()) };
    let column_names: Vec<String> = (0..r.arity).map(|i| format!("col{i}")).collect();
    let storage_tuples: Vec<crate::value::Tuple> = r
        .scan()
        .map(|t| {
            let fields: Vec<crate::value::Value> = t
                .as_slice()
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let dt = r.attr_types.get(i).copied().unwrap_or(crate::value::DataType::Int64);
                    v.to_storage(dt, symtab)
                })
                .collect();
            crate::value::Tuple::new(fields)
        })
        .collect();
    let path = std::path::Path::new(&directive.path);
    if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
        let schema = crate::value::TupleSchema::new(
            column_names
                .iter()
                .enumerate()
                .map(|(i, n)| (n.clone(), r.attr_types.get(i).copied().unwrap_or(crate::value::DataType::Int64)))
                .collect(),
        );
        crate::storage::save_to_parquet(path, &schema, &storage_tuples)
    } else {
        crate::storage::save_to_csv(path, &column_names, &storage_tuples)
    }
}

impl<'a> Interpreter<'a> {
    fn poll_cancel(&mut self) -> Result<(), EvalError> {
        self.instructions_since_poll += 1;
        if self.instructions_since_poll >= CANCEL_POLL_INTERVAL {
            self.instructions_since_poll = 0;
            if self.cancel.is_cancelled() {
                return Err(EvalError::Cancelled);
            }
        }
        Ok(())
    }

    /// Run from `start` until `Stop` (returns `None`) or `StopParallel`
    /// (returns `Some(join_addr)`). `Parallel` blocks are handled inline:
    /// encountering one spawns a worker per branch, merges their deltas
    /// once all join, and continues from the join address.
    fn run(
        &mut self,
        code: &[i64],
        start: Addr,
        sink: &mut Sink,
        ctx: &mut EvalContext,
        autoinc: &mut AutoIncrementState,
    ) -> Result<Option<Addr>, EvalError> {
        let mut ip = start;
        loop {
            self.poll_cancel()?;
            let (op, next) = decode(code, ip);
            match op {
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                    let b = ctx.pop(ip)?.as_int().unwrap_or_default();
                    let a = ctx.pop(ip)?.as_int().unwrap_or_default();
                    let r = match op {
                        Opcode::Add => a.wrapping_add(b),
                        Opcode::Sub => a.wrapping_sub(b),
                        Opcode::Mul => a.wrapping_mul(b),
                        Opcode::Div => {
                            if b == 0 {
                                return Err(EvalError::DivisionByZero);
                            }
                            a / b
                        }
                        Opcode::Mod => {
                            if b == 0 {
                                return Err(EvalError::DivisionByZero);
                            }
                            a % b
                        }
                        _ => unreachable!(),
                    };
                    ctx.push(Value::Int(r));
                }
                Opcode::CmpEq | Opcode::CmpNe | Opcode::CmpLt | Opcode::CmpLe | Opcode::CmpGt | Opcode::CmpGe => {
                    let b = ctx.pop(ip)?;
                    let a = ctx.pop(ip)?;
                    let r = match op {
                        Opcode::CmpEq => a == b,
                        Opcode::CmpNe => a != b,
                        Opcode::CmpLt => a < b,
                        Opcode::CmpLe => a <= b,
                        Opcode::CmpGt => a > b,
                        Opcode::CmpGe => a >= b,
                        _ => unreachable!(),
                    };
                    ctx.push(Value::Int(r as i64));
                }
                Opcode::And => {
                    let b = ctx.pop(ip)?.as_int().unwrap_or_default();
                    let a = ctx.pop(ip)?.as_int().unwrap_or_default();
                    ctx.push(Value::Int(((a != 0) && (b != 0)) as i64));
                }
                Opcode::Or => {
                    let b = ctx.pop(ip)?.as_int().unwrap_or_default();
                    let a = ctx.pop(ip)?.as_int().unwrap_or_default();
                    ctx.push(Value::Int(((a != 0) || (b != 0)) as i64));
                }
                Opcode::Not => {
                    let a = ctx.pop(ip)?.as_int().unwrap_or_default();
                    ctx.push(Value::Int((a == 0) as i64));
                }
                Opcode::Neg => {
                    let a = ctx.pop(ip)?.as_int().unwrap_or_default();
                    ctx.push(Value::Int(-a));
                }
                Opcode::AutoIncrement => {
                    ctx.push(Value::Int(autoinc.alloc()));
                }
                Opcode::Number(v) => ctx.push(v),
                Opcode::ElementAccess { level, col } => {
                    ctx.push(ctx.element(level, col, ip)?);
                }
                Opcode::PackRecord { arity } => {
                    let mut fields = Vec::with_capacity(arity as usize);
                    for _ in 0..arity {
                        fields.push(ctx.pop(ip)?);
                    }
                    fields.reverse();
                    let id = self.record_pool.pack(fields);
                    ctx.push(Value::RecordId(id));
                }
                Opcode::UnpackRecord { arity, out_level } => {
                    let rec = ctx.pop(ip)?;
                    let Value::RecordId(id) = rec else {
                        return Err(EvalError::DanglingRecord(0));
                    };
                    let fields = self
                        .record_pool
                        .try_unpack(id)
                        .ok_or(EvalError::DanglingRecord(id.0))?;
                    debug_assert_eq!(fields.len(), arity as usize);
                    ctx.bind(out_level, Tuple::new(fields));
                }
                Opcode::EmptinessCheck { relation } => {
                    ctx.push(Value::Int(sink.is_empty(relation)? as i64));
                }
                Opcode::ExistenceCheck { relation, bound_mask } => {
                    let n = bound_mask.count_ones() as usize;
                    let mut popped = Vec::with_capacity(n);
                    for _ in 0..n {
                        popped.push(ctx.pop(ip)?);
                    }
                    popped.reverse();
                    let matches = !sink.index_scan(relation, bound_mask, &popped)?.is_empty();
                    ctx.push(Value::Int(matches as i64));
                }
                Opcode::ProvenanceExistenceCheck { relation, bound_mask } => {
                    let n = bound_mask.count_ones() as usize;
                    let mut popped = Vec::with_capacity(n + 1);
                    for _ in 0..(n + 1) {
                        popped.push(ctx.pop(ip)?);
                    }
                    popped.reverse();
                    let bound_values = &popped[..n];
                    let matches = !sink.index_scan(relation, bound_mask, bound_values)?.is_empty();
                    ctx.push(Value::Int(matches as i64));
                }
                Opcode::Project { relation, arity } => {
                    let mut values = Vec::with_capacity(arity as usize);
                    for _ in 0..arity {
                        values.push(ctx.pop(ip)?);
                    }
                    values.reverse();
                    self.limits
                        .check_row_width(values.len())
                        .map_err(|e| EvalError::ResourceLimit(e.to_string()))?;
                    sink.project(relation, Tuple::new(values))?;
                    let name = self.symtab.try_resolve(relation).unwrap_or_default();
                    self.limits
                        .check_intermediate_size(&name, sink.size(relation)?)
                        .map_err(|e| EvalError::ResourceLimit(e.to_string()))?;
                }
                Opcode::Fact { relation, arity } => {
                    let mut values = Vec::with_capacity(arity as usize);
                    for _ in 0..arity {
                        values.push(ctx.pop(ip)?);
                    }
                    values.reverse();
                    sink.project(relation, Tuple::new(values))?;
                }
                Opcode::Create {
                    relation,
                    arity,
                    storage_kind,
                    attr_types,
                } => {
                    let name = self
                        .symtab
                        .try_resolve(relation)
                        .unwrap_or_else(|| format!("rel{}", relation.0));
                    sink.require_direct(ip)?.create(relation, name, arity as usize, storage_kind, attr_types);
                }
                Opcode::Clear { relation } => sink.require_direct(ip)?.clear(relation),
                Opcode::Drop { relation } => sink.require_direct(ip)?.drop_relation(relation),
                Opcode::Load { relation, io_index } => {
                    let rm = sink.require_direct(ip)?;
                    if let Some(directive) = self.io.load.get(&io_index) {
                        load_relation(rm, relation, directive, self.symtab)
                            .map_err(|e| EvalError::Io(e.to_string()))?;
                    }
                }
                Opcode::Store { relation, io_index } => {
                    let rm = sink.require_direct(ip)?;
                    if let Some(directive) = self.io.store.get(&io_index) {
                        store_relation(rm, relation, directive, self.symtab)
                            .map_err(|e| EvalError::Io(e.to_string()))?;
                    }
                }
                Opcode::Merge { target, source } => {
                    sink.require_direct(ip)?.merge(target, source);
                }
                Opcode::Swap { a, b } => {
                    sink.require_direct(ip)?.swap(a, b);
                }
                Opcode::LogSize { relation } => {
                    tracing::debug!(relation = relation.0, size = sink.size(relation)?, "relation size");
                }
                Opcode::IterScan { relation, slot } => {
                    ctx.open_iter(slot, RelIter::new(sink.scan(relation)?));
                }
                Opcode::IterIndexScan { relation, slot, bound_mask } => {
                    let n = bound_mask.count_ones() as usize;
                    let mut bound = Vec::with_capacity(n);
                    for _ in 0..n {
                        bound.push(ctx.pop(ip)?);
                    }
                    bound.reverse();
                    ctx.open_iter(slot, RelIter::new(sink.index_scan(relation, bound_mask, &bound)?));
                }
                Opcode::IterNotAtEnd { slot } => {
                    ctx.push(Value::Int(ctx.iter_mut(slot).not_at_end() as i64));
                }
                Opcode::IterSelect { slot, out_level } => {
                    let tuple = ctx.iter_mut(slot).current().clone();
                    ctx.bind(out_level, tuple);
                }
                Opcode::IterInc { slot } => {
                    ctx.iter_mut(slot).advance();
                    if !ctx.iter_mut(slot).not_at_end() {
                        ctx.close_iter(slot);
                    }
                }
                Opcode::AggInit { slot, func } => ctx.agg_init(slot, func),
                Opcode::AggStep { slot, .. } => {
                    let v = ctx.pop(ip)?.as_int().unwrap_or_default();
                    ctx.agg_step(slot, v);
                }
                Opcode::AggFinish { slot, .. } => {
                    let result = ctx.agg_finish(slot);
                    ctx.bind(slot, Tuple::new(vec![Value::Int(result)]));
                }
                Opcode::Goto(target) => {
                    ip = target;
                    continue;
                }
                Opcode::Jmpnz(target) => {
                    let cond = ctx.pop(ip)?.as_int().unwrap_or_default();
                    if cond != 0 {
                        ip = target;
                        continue;
                    }
                }
                Opcode::Jmpez(target) => {
                    let cond = ctx.pop(ip)?.as_int().unwrap_or_default();
                    if cond == 0 {
                        ip = target;
                        continue;
                    }
                }
                Opcode::IncIterationNumber => {
                    if self.cancel.is_cancelled() {
                        return Err(EvalError::Cancelled);
                    }
                }
                Opcode::ResetIterationNumber | Opcode::Nop => {}
                Opcode::Parallel(branch_addrs) => {
                    self.run_parallel(code, &branch_addrs, sink, autoinc)?;
                }
                Opcode::StopParallel(join) => return Ok(Some(join)),
                Opcode::Stop => return Ok(None),
            }
            ip = next;
        }
    }

    fn run_parallel(
        &mut self,
        code: &[i64],
        branch_addrs: &[Addr],
        sink: &mut Sink,
        autoinc: &mut AutoIncrementState,
    ) -> Result<(), EvalError> {
        let relations: &RelationManager = sink.relations();
        let mut branch_autoinc = autoinc.split(branch_addrs.len());

        let results: Vec<Result<DeltaBuffer, EvalError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = branch_addrs
                .iter()
                .zip(branch_autoinc.iter_mut())
                .map(|(&addr, local_autoinc)| {
                    let record_pool = self.record_pool;
                    let symtab = self.symtab;
                    let cancel = self.cancel;
                    let io = self.io;
                    let limits = self.limits;
                    scope.spawn(move || {
                        let mut delta = DeltaBuffer::default();
                        let mut worker_sink = Sink::Deferred {
                            relations,
                            delta: &mut delta,
                        };
                        let mut worker_ctx = EvalContext::new();
                        let mut worker = Interpreter {
                            record_pool,
                            symtab,
                            cancel,
                            io,
                            limits,
                            instructions_since_poll: 0,
                        };
                        worker.run(code, addr, &mut worker_sink, &mut worker_ctx, local_autoinc)?;
                        Ok(delta)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("parallel worker panicked")).collect()
        });

        let mut buffers = Vec::with_capacity(results.len());
        for r in results {
            buffers.push(r?);
        }
        match sink {
            Sink::Direct(rm) => {
                merge_deltas(rm, buffers);
            }
            Sink::Deferred { delta, .. } => {
                for b in buffers {
                    for (relation, tuples) in b.into_inserts() {
                        for t in tuples {
                            delta.record(relation, t);
                        }
                    }
                }
            }
        }
        *autoinc = AutoIncrementState::join(&branch_autoinc);
        Ok(())
    }
}

/// A finished (or cancelled) run: the outcome status plus every relation
/// that was `Create`d during it, so callers can inspect final contents --
/// `RelationManager` is otherwise dropped at the end of `run`.
pub struct EvalOutcome {
    pub status: Status,
    pub relations: RelationManager,
}

/// Run a compiled program to completion (or until cancelled). `Load`/`Store`
/// opcodes resolve their `io_index` against `io` and call through to
/// `crate::storage`; relations they touch must already exist (a `Create`
/// always precedes them in a `ram_builder`-assembled program).
pub fn evaluate(
    program: &LvmProgram,
    record_pool: &RecordPool,
    symtab: &SymbolTable,
    io: &IoDirectiveSet,
    cancel: &CancelHandle,
) -> Result<EvalOutcome, EvalError> {
    evaluate_with_limits(program, record_pool, symtab, io, cancel, &ResourceLimits::default())
}

/// Same as [`evaluate`], but enforces `limits` on every `Project`/`Fact`
/// emission (row width, and per-relation growth against
/// `max_intermediate_size`). Unlimited by default; callers that want a
/// hard cap on a runaway fixed-point use this entrypoint directly.
pub fn evaluate_with_limits(
    program: &LvmProgram,
    record_pool: &RecordPool,
    symtab: &SymbolTable,
    io: &IoDirectiveSet,
    cancel: &CancelHandle,
    limits: &ResourceLimits,
) -> Result<EvalOutcome, EvalError> {
    let mut relations = RelationManager::default();
    let mut sink = Sink::Direct(&mut relations);
    let mut ctx = EvalContext::new();
    let mut autoinc = AutoIncrementState::sequential(0);
    let mut interp = Interpreter {
        record_pool,
        symtab,
        cancel,
        io,
        limits,
        instructions_since_poll: 0,
    };
    let status = match interp.run(&program.code, program.entry, &mut sink, &mut ctx, &mut autoinc) {
        Ok(_) => Status::Completed,
        Err(EvalError::Cancelled) => Status::Cancelled,
        Err(e) => return Err(e),
    };
    Ok(EvalOutcome { status, relations })
}
