//! # RAM Transformers
//!
//! `HoistConditions`, `MakeIndex`, `IfConversion`, run as a pipeline with a
//! fixed-point meta-transformer. Each pass returns whether it mutated the
//! program; the driver reruns all three until none report a change, bounded
//! by `max_iterations` (`config::RamConfig::max_transform_iterations`,
//! default 4) to guard against pathological oscillation.

mod hoist_conditions;
mod if_conversion;
mod make_index;
mod spine;

pub use hoist_conditions::run as hoist_conditions;
pub use if_conversion::run as if_conversion;
pub use make_index::run as make_index;

use crate::ram::error::RamError;
use crate::ram::node::RamNode;

/// Run the fixed-point transformer pipeline. Every pass here must preserve
/// the evaluated result of the program (`Evaluate(P) = Evaluate(T(P))`) --
/// it only changes execution shape.
pub fn pipeline(mut program: RamNode, max_iterations: usize) -> Result<RamNode, RamError> {
    for _ in 0..max_iterations.max(1) {
        let mut changed = false;

        let (p, c) = hoist_conditions(program)?;
        program = p;
        changed |= c;

        let (p, c) = make_index(program)?;
        program = p;
        changed |= c;

        let (p, c) = if_conversion(program)?;
        program = p;
        changed |= c;

        if !changed {
            break;
        }
    }
    Ok(program)
}
