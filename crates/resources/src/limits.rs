//! Concurrency limits

use serde::{Deserialize, Serialize};

/// Hard ceiling on concurrent builds regardless of host size
pub const MAX_PARALLELISM: usize = 8;

/// The build parallelism bound: `min(cpus, configured, 8)`
///
/// A `configured` value of 0 means "as many as the host allows".
#[must_use]
pub fn parallelism(configured: usize) -> usize {
    bound(num_cpus::get(), configured)
}

fn bound(cpus: usize, configured: usize) -> usize {
    let mut limit = cpus.clamp(1, MAX_PARALLELISM);
    if configured > 0 {
        limit = limit.min(configured);
    }
    limit
}

/// Resource limit configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of installers running at once
    pub concurrent_builds: usize,
}

impl ResourceLimits {
    /// Limits for a configured parallelism (0 = auto)
    #[must_use]
    pub fn from_parallelism(configured: usize) -> Self {
        Self {
            concurrent_builds: parallelism(configured),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from_parallelism(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound() {
        assert_eq!(bound(4, 0), 4);
        assert_eq!(bound(32, 0), MAX_PARALLELISM);
        assert_eq!(bound(32, 3), 3);
        assert_eq!(bound(2, 6), 2);
        assert_eq!(bound(0, 0), 1);
    }

    #[test]
    fn test_limits_never_exceed_ceiling() {
        let limits = ResourceLimits::from_parallelism(100);
        assert!(limits.concurrent_builds <= MAX_PARALLELISM);
        assert!(limits.concurrent_builds >= 1);
    }
}
