//! # Per-query evaluation context
//!
//! One `EvalContext` is created for every `LVM_Query` codepath. It owns the
//! operand stack, the tuple environment (`environment[level]`, read by
//! `ElementAccess`/written by `IterSelect`/`AggFinish`), the iterator slots
//! (`RelIter`, one per open `Scan`/`IndexScan`/`Aggregate`), and aggregate
//! accumulators keyed by the aggregate's own tuple id.

use std::collections::HashMap;

use crate::ram::node::AggregateOp;
use crate::ram::value::{Tuple, Value};

use super::error::EvalError;
use super::iter::RelIter;

/// Running reduction state for one `Aggregate` node. Operates over `i64`
/// machine words; this crate's RAM aggregates never reduce over floats or
/// symbols, matching `ram_builder`'s lowering of `IRNode::Aggregate`.
#[derive(Debug, Clone, Copy)]
pub struct AggAccum {
    func: AggregateOp,
    count: i64,
    sum: i64,
    min: i64,
    max: i64,
}

impl AggAccum {
    pub fn new(func: AggregateOp) -> Self {
        AggAccum {
            func,
            count: 0,
            sum: 0,
            min: i64::MAX,
            max: i64::MIN,
        }
    }

    pub fn step(&mut self, v: i64) {
        self.count += 1;
        self.sum += v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    pub fn finish(&self) -> i64 {
        match self.func {
            AggregateOp::Count => self.count,
            AggregateOp::Sum => self.sum,
            AggregateOp::Min => {
                if self.count == 0 {
                    0
                } else {
                    self.min
                }
            }
            AggregateOp::Max => {
                if self.count == 0 {
                    0
                } else {
                    self.max
                }
            }
        }
    }
}

pub struct EvalContext {
    operand_stack: Vec<Value>,
    environment: HashMap<u32, Tuple>,
    iterators: HashMap<u32, RelIter>,
    agg_accum: HashMap<u32, AggAccum>,
}

impl Default for EvalContext {
    fn default() -> Self {
        EvalContext {
            operand_stack: Vec::new(),
            environment: HashMap::new(),
            iterators: HashMap::new(),
            agg_accum: HashMap::new(),
        }
    }
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, v: Value) {
        self.operand_stack.push(v);
    }

    pub fn pop(&mut self, addr: usize) -> Result<Value, EvalError> {
        self.operand_stack
            .pop()
            .ok_or(EvalError::StackUnderflow { addr })
    }

    pub fn bind(&mut self, level: u32, tuple: Tuple) {
        self.environment.insert(level, tuple);
    }

    pub fn element(&self, level: u32, col: u32, addr: usize) -> Result<Value, EvalError> {
        self.environment
            .get(&level)
            .and_then(|t| t.get(col as usize))
            .ok_or(EvalError::StackUnderflow { addr })
    }

    pub fn open_iter(&mut self, slot: u32, iter: RelIter) {
        self.iterators.insert(slot, iter);
    }

    pub fn iter_mut(&mut self, slot: u32) -> &mut RelIter {
        self.iterators
            .get_mut(&slot)
            .expect("IterNotAtEnd/IterSelect/IterInc always follow an IterScan/IterIndexScan")
    }

    pub fn close_iter(&mut self, slot: u32) {
        self.iterators.remove(&slot);
    }

    pub fn agg_init(&mut self, slot: u32, func: AggregateOp) {
        self.agg_accum.insert(slot, AggAccum::new(func));
    }

    pub fn agg_step(&mut self, slot: u32, v: i64) {
        self.agg_accum
            .get_mut(&slot)
            .expect("AggStep always follows AggInit")
            .step(v);
    }

    pub fn agg_finish(&mut self, slot: u32) -> i64 {
        self.agg_accum
            .remove(&slot)
            .expect("AggFinish always follows AggInit")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_pushes_and_pops_in_order() {
        let mut ctx = EvalContext::new();
        ctx.push(Value::Int(1));
        ctx.push(Value::Int(2));
        assert_eq!(ctx.pop(0).unwrap(), Value::Int(2));
        assert_eq!(ctx.pop(0).unwrap(), Value::Int(1));
        assert!(ctx.pop(0).is_err());
    }

    #[test]
    fn aggregate_sum_and_count() {
        let mut acc = AggAccum::new(AggregateOp::Sum);
        acc.step(3);
        acc.step(4);
        assert_eq!(acc.finish(), 7);

        let mut acc = AggAccum::new(AggregateOp::Count);
        acc.step(3);
        acc.step(4);
        assert_eq!(acc.finish(), 2);
    }

    #[test]
    fn aggregate_over_no_candidates_is_zero() {
        let acc = AggAccum::new(AggregateOp::Max);
        assert_eq!(acc.finish(), 0);
    }
}
