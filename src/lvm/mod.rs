//! # LVM: Logic Virtual Machine
//!
//! The bytecode backend: `compiler` lowers a transformed `RamNode` tree
//! into flat bytecode, `opcode` defines that bytecode's instruction set,
//! `disasm` renders it back to text, and `eval` is the stack-machine
//! interpreter that runs it.

pub mod compiler;
pub mod disasm;
pub mod eval;
pub mod opcode;

pub use compiler::{compile, verify, CompileError, LvmProgram, VerifyError};
pub use eval::{evaluate, evaluate_with_limits, EvalError, EvalOutcome, IoDirective, IoDirectiveSet, Status};
