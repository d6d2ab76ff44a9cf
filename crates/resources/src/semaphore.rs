//! Semaphore helpers

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use vessel_errors::Error;

/// Create a shared semaphore with `permits` slots
#[must_use]
pub fn create_semaphore(permits: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(permits.max(1)))
}

/// Wait for a permit
///
/// # Errors
///
/// Returns an error if the semaphore was closed.
pub async fn acquire_semaphore_permit(
    semaphore: Arc<Semaphore>,
    resource: &str,
) -> Result<OwnedSemaphorePermit, Error> {
    semaphore
        .acquire_owned()
        .await
        .map_err(|_| Error::internal(format!("{resource} semaphore closed")))
}

/// Take a permit if one is free
///
/// # Errors
///
/// Returns an error if the semaphore was closed.
pub fn try_acquire_semaphore_permit(
    semaphore: Arc<Semaphore>,
    resource: &str,
) -> Result<Option<OwnedSemaphorePermit>, Error> {
    match semaphore.try_acquire_owned() {
        Ok(permit) => Ok(Some(permit)),
        Err(TryAcquireError::NoPermits) => Ok(None),
        Err(TryAcquireError::Closed) => {
            Err(Error::internal(format!("{resource} semaphore closed")))
        }
    }
}
