//! Evaluator faults (spec.md §7 "Error Handling Design").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("query cancelled")]
    Cancelled,
    #[error("query exceeded its deadline after {elapsed:?}")]
    Timeout { elapsed: std::time::Duration },
    #[error("reference to undeclared relation slot {0}")]
    UndeclaredRelation(String),
    #[error("operand stack underflow executing opcode at {addr}")]
    StackUnderflow { addr: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("record pool lookup failed for record id {0}")]
    DanglingRecord(u32),
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),
    #[error("I/O directive error: {0}")]
    Io(String),
}

/// The top-level evaluation outcome spec.md §6 describes
/// (`lvm::eval::evaluate(...) -> Status`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Completed,
    Cancelled,
    TimedOut,
}
