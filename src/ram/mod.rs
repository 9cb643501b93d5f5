//! # RAM: Relational Algebra Machine intermediate representation
//!
//! The tree IR that sits between the parsed Datalog program
//! (`crate::ram_builder`) and the LVM bytecode (`crate::lvm`): the node
//! kinds, three pure analyses, and the transformer pipeline that prepares a
//! `RamNode` tree for compilation.

pub mod analysis;
pub mod error;
pub mod node;
pub mod transform;
pub mod value;

pub use error::RamError;
pub use node::{
    AggregateOp, BinOp, CompareOp, Pattern, RamCondition, RamExpression, RamNode, RelationRef,
    StorageKind,
};
pub use value::{Tuple, Value};
