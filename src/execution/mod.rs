//! Query Execution Module
//!
//! Provides production-grade query execution with:
//! - Timeout enforcement
//! - Resource limits (memory, result size)
//!
//! ## Example
//!
//! ```rust,no_run
//! use flowlog::execution::{ExecutionConfig, ResourceLimits};
//! use std::time::Duration;
//!
//! let config = ExecutionConfig::default()
//!     .with_timeout(Duration::from_secs(30))
//!     .with_max_results(100_000);
//! ```

mod limits;
mod timeout;

pub use limits::{MemoryTracker, ResourceError, ResourceLimits};
pub use timeout::{CancelHandle, QueryTimeout, TimeoutError};

use std::time::Duration;

/// Configuration for query execution
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Query timeout duration (None = no timeout)
    pub timeout: Option<Duration>,

    /// Resource limits
    pub limits: ResourceLimits,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            timeout: Some(Duration::from_secs(60)),
            limits: ResourceLimits::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.limits = self.limits.with_max_result_size(max);
        self
    }

    pub fn query_timeout(&self) -> QueryTimeout {
        QueryTimeout::new(self.timeout)
    }
}
