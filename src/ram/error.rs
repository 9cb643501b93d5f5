//! Compile-time invariant violations over the RAM tree: unsplit
//! conjunctions, dangling tuple identifiers, undeclared relations. Raised
//! by `ram_builder` and by the transformer pipeline, never by the
//! evaluator.

#[derive(Debug, Clone, thiserror::Error)]
pub enum RamError {
    #[error("relation '{0}' referenced before it was declared by Create")]
    UndeclaredRelation(String),

    #[error("filter condition is a conjunction; HoistConditions requires fully-split filters")]
    UnsplitConjunction,

    #[error("tuple identifier {0} is never bound by an enclosing scan")]
    DanglingTupleId(usize),

    #[error("MakeIndex: attribute {0} is constrained by more than one equality in the same pattern")]
    DuplicatePatternAttribute(usize),

    #[error("lowering error: {0}")]
    Lowering(String),
}
