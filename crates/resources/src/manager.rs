//! Shared build permits

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use vessel_errors::Error;

use crate::limits::ResourceLimits;
use crate::semaphore::{acquire_semaphore_permit, create_semaphore, try_acquire_semaphore_permit};

/// Hands out build permits; clones share the same pool
#[derive(Debug, Clone)]
pub struct ResourceManager {
    limits: ResourceLimits,
    builds: Arc<Semaphore>,
}

impl ResourceManager {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        tracing::debug!(builds = limits.concurrent_builds, "resource limits");
        Self {
            builds: create_semaphore(limits.concurrent_builds),
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Wait for a build slot
    ///
    /// # Errors
    ///
    /// Returns an error if the pool was closed.
    pub async fn acquire_build(&self) -> Result<OwnedSemaphorePermit, Error> {
        acquire_semaphore_permit(self.builds.clone(), "build").await
    }

    /// Take a build slot without waiting
    ///
    /// # Errors
    ///
    /// Returns an error if the pool was closed.
    pub fn try_acquire_build(&self) -> Result<Option<OwnedSemaphorePermit>, Error> {
        try_acquire_semaphore_permit(self.builds.clone(), "build")
    }

    /// Build slots currently free
    #[must_use]
    pub fn available_builds(&self) -> usize {
        self.builds.available_permits()
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}
