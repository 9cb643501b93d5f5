//! Resource Limits Module
//!
//! Provides resource limit enforcement for query execution:
//! - Memory usage limits
//! - Result set size limits
//! - Intermediate result limits
//!
//! ## Design
//!
//! Uses cooperative checking - query execution code should periodically
//! call `check_*` methods to verify limits are not exceeded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Resource limit error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResourceError {
    /// Memory limit exceeded
    #[error("Memory limit exceeded: used {used} bytes, limit {limit} bytes")]
    MemoryLimitExceeded { limit: usize, used: usize },

    /// Result size limit exceeded
    #[error("Result size limit exceeded: {actual} tuples, limit {limit} tuples")]
    ResultSizeLimitExceeded { limit: usize, actual: usize },

    /// Intermediate result size exceeded
    #[error(
        "Intermediate result limit exceeded at '{stage}': {actual} tuples, limit {limit} tuples"
    )]
    IntermediateResultExceeded {
        limit: usize,
        actual: usize,
        stage: String,
    },

    /// Row width (tuple arity) exceeded
    #[error("Row width limit exceeded: {actual} columns, limit {limit} columns")]
    RowWidthExceeded { limit: usize, actual: usize },
}

/// Resource limits configuration
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum memory usage in bytes (None = unlimited)
    pub max_memory_bytes: Option<usize>,

    /// Maximum number of tuples in final result (None = unlimited)
    pub max_result_size: Option<usize>,

    /// Maximum number of tuples in intermediate results (None = unlimited)
    pub max_intermediate_size: Option<usize>,

    /// Maximum row width (number of columns per tuple)
    pub max_row_width: Option<usize>,

    /// Maximum recursion depth for fixpoint iterations
    pub max_recursion_depth: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            max_memory_bytes: None,
            max_result_size: None,
            max_intermediate_size: None,
            max_row_width: None,
            max_recursion_depth: None,
        }
    }
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        ResourceLimits::default()
    }

    pub fn with_max_memory_bytes(mut self, limit: usize) -> Self {
        self.max_memory_bytes = Some(limit);
        self
    }

    pub fn with_max_result_size(mut self, limit: usize) -> Self {
        self.max_result_size = Some(limit);
        self
    }

    pub fn with_max_intermediate_size(mut self, limit: usize) -> Self {
        self.max_intermediate_size = Some(limit);
        self
    }

    pub fn with_max_row_width(mut self, limit: usize) -> Self {
        self.max_row_width = Some(limit);
        self
    }

    pub fn with_max_recursion_depth(mut self, limit: usize) -> Self {
        self.max_recursion_depth = Some(limit);
        self
    }

    pub fn check_result_size(&self, actual: usize) -> Result<(), ResourceError> {
        if let Some(limit) = self.max_result_size {
            if actual > limit {
                return Err(ResourceError::ResultSizeLimitExceeded { limit, actual });
            }
        }
        Ok(())
    }

    pub fn check_intermediate_size(&self, stage: &str, actual: usize) -> Result<(), ResourceError> {
        if let Some(limit) = self.max_intermediate_size {
            if actual > limit {
                return Err(ResourceError::IntermediateResultExceeded {
                    limit,
                    actual,
                    stage: stage.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn check_row_width(&self, actual: usize) -> Result<(), ResourceError> {
        if let Some(limit) = self.max_row_width {
            if actual > limit {
                return Err(ResourceError::RowWidthExceeded { limit, actual });
            }
        }
        Ok(())
    }
}

/// Tracks live memory usage against a `ResourceLimits` budget.
///
/// Every allocation the evaluator attributes to a query (relation growth,
/// intermediate join results) goes through `track`/`untrack` so the limit
/// can be enforced without a global allocator hook.
#[derive(Clone)]
pub struct MemoryTracker {
    used: Arc<AtomicUsize>,
    limit: Option<usize>,
}

impl MemoryTracker {
    pub fn new(limit: Option<usize>) -> Self {
        MemoryTracker {
            used: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Record `bytes` of additional usage, returning an error if this pushes
    /// usage past the configured limit. The allocation is still counted even
    /// on error so repeated failures don't understate pressure.
    pub fn track(&self, bytes: usize) -> Result<(), ResourceError> {
        let used = self.used.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if let Some(limit) = self.limit {
            if used > limit {
                return Err(ResourceError::MemoryLimitExceeded { limit, used });
            }
        }
        Ok(())
    }

    pub fn untrack(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_size_within_limit() {
        let limits = ResourceLimits::unlimited().with_max_result_size(100);
        assert!(limits.check_result_size(50).is_ok());
    }

    #[test]
    fn result_size_exceeds_limit() {
        let limits = ResourceLimits::unlimited().with_max_result_size(10);
        assert!(matches!(
            limits.check_result_size(11),
            Err(ResourceError::ResultSizeLimitExceeded { limit: 10, actual: 11 })
        ));
    }

    #[test]
    fn memory_tracker_flags_overage() {
        let tracker = MemoryTracker::new(Some(100));
        assert!(tracker.track(60).is_ok());
        assert!(tracker.track(60).is_err());
        assert_eq!(tracker.used(), 120);
    }

    #[test]
    fn memory_tracker_untrack_reduces_usage() {
        let tracker = MemoryTracker::new(None);
        tracker.track(100).unwrap();
        tracker.untrack(40);
        assert_eq!(tracker.used(), 60);
    }
}
