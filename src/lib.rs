//! # flowlog
//!
//! A Datalog compiler and bytecode evaluator: a relational-algebra IR
//! (RAM), a fixed-point transformer pipeline over it, and a stack-machine
//! bytecode backend (LVM) that runs the transformed program to a fixpoint.
//!
//! ## Pipeline
//!
//! ```text
//! Datalog source
//!     |  parser::parse_program
//!     v
//! datalog_ast::Program
//!     |  ram_builder::build_program   (stratify, semi-naive assembly)
//!     v
//! ram::RamNode (untransformed)
//!     |  ram::transform::pipeline     (HoistConditions/MakeIndex/IfConversion)
//!     v
//! ram::RamNode (transformed)
//!     |  lvm::compile                 (+ lvm::verify)
//!     v
//! lvm::LvmProgram (flat bytecode)
//!     |  lvm::evaluate
//!     v
//! lvm::EvalOutcome { status, relations }
//! ```
//!
//! The surface-syntax parser, an AST-level type system, native codegen,
//! CLI flag parsing, debug-report rendering, and fact-file readers/writers
//! beyond the plain CSV/Parquet boundary are intentionally thin or absent
//! here -- this crate's scope is the RAM/LVM core. See `DESIGN.md`.

pub mod config;
pub mod execution;
pub mod lvm;
pub mod parser;
pub mod ram;
pub mod ram_builder;
pub mod record_pool;
pub mod recursion;
pub mod storage;
pub mod symbol_table;
pub mod value;

pub use config::Config;
pub use lvm::{compile, evaluate, verify, CompileError, EvalError, EvalOutcome, LvmProgram, Status, VerifyError};
pub use parser::{parse_program, parse_rule};
pub use ram::{RamError, RamNode};
pub use ram_builder::build_program;
pub use record_pool::{RecordId, RecordPool};
pub use symbol_table::{SymbolId, SymbolTable};
pub use value::{DataType, SchemaValidationError, Tuple, TupleSchema, Value};

pub use datalog_ast::{
    AggregateFunc, ArithExpr, ArithOp, Atom, BodyPredicate, Constraint, Program, Rule, Term,
};

/// Run the full pipeline on a parsed program: build the raw RAM tree,
/// transform it to a fixed point, compile to bytecode, verify the result,
/// and return it ready for `lvm::evaluate`.
///
/// This is the single entry point `main.rs` and integration tests drive;
/// library users who need to inspect an intermediate stage (the raw RAM
/// tree, the transformed tree) should call the pipeline steps directly
/// instead.
pub fn compile_program(
    program: &datalog_ast::Program,
    symtab: &symbol_table::SymbolTable,
    max_transform_iterations: usize,
) -> Result<lvm::LvmProgram, CompileProgramError> {
    let raw = ram_builder::build_program(program, symtab)?;
    let transformed = ram::transform::pipeline(raw, max_transform_iterations)?;
    let compiled = lvm::compile(&transformed, symtab)?;
    lvm::verify(&compiled)?;
    Ok(compiled)
}

#[derive(Debug, thiserror::Error)]
pub enum CompileProgramError {
    #[error(transparent)]
    Ram(#[from] ram::RamError),
    #[error(transparent)]
    Compile(#[from] lvm::CompileError),
    #[error(transparent)]
    Verify(#[from] lvm::VerifyError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use lvm::{evaluate, IoDirectiveSet};

    #[test]
    fn end_to_end_transitive_closure() {
        let program = parse_program(
            "edge(1, 2).\n\
             edge(2, 3).\n\
             edge(3, 4).\n\
             tc(x, y) :- edge(x, y).\n\
             tc(x, z) :- tc(x, y), edge(y, z).\n",
        )
        .expect("parses");

        let symtab = SymbolTable::new();
        let compiled = compile_program(&program, &symtab, 4).expect("compiles");

        let pool = RecordPool::default();
        let io = IoDirectiveSet::default();
        let cancel = execution::QueryTimeout::infinite().cancel_handle();
        let outcome = evaluate(&compiled, &pool, &symtab, &io, &cancel).expect("evaluates");
        assert_eq!(outcome.status, Status::Completed);

        let tc_id = symtab.lookup("tc").expect("tc was created");
        let tc = outcome.relations.get(tc_id).expect("tc relation exists");
        assert_eq!(tc.len(), 6); // (1,2)(1,3)(1,4)(2,3)(2,4)(3,4)
    }
}
