//! Core platform abstractions and context management

use vessel_events::{EventEmitter, EventSender};

use crate::binary::BinaryOperations;
use crate::process::ProcessOperations;

/// Context for platform operations, providing event emission and the id being built
#[derive(Clone, Default)]
pub struct PlatformContext {
    event_sender: Option<EventSender>,
    id: Option<String>,
}

impl PlatformContext {
    /// Create a new platform context with event emission capabilities
    #[must_use]
    pub fn new(event_sender: Option<EventSender>) -> Self {
        Self {
            event_sender,
            id: None,
        }
    }

    /// Attribute command output to a package id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The package id output is attributed to, if any
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl EventEmitter for PlatformContext {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

/// Main platform abstraction providing access to all platform operations
pub struct Platform {
    binary_ops: Box<dyn BinaryOperations>,
    process_ops: Box<dyn ProcessOperations>,
}

impl Platform {
    /// Create a new platform instance with the specified implementations
    #[must_use]
    pub fn new(
        binary_ops: Box<dyn BinaryOperations>,
        process_ops: Box<dyn ProcessOperations>,
    ) -> Self {
        Self {
            binary_ops,
            process_ops,
        }
    }

    /// The platform for the running host
    #[must_use]
    pub fn current() -> Self {
        use crate::implementations::{HostBinaryOperations, HostProcessOperations};

        Self::new(
            Box::new(HostBinaryOperations::new()),
            Box::new(HostProcessOperations::new()),
        )
    }

    /// Access binary operations
    #[must_use]
    pub fn binary(&self) -> &dyn BinaryOperations {
        &*self.binary_ops
    }

    /// Access process operations
    #[must_use]
    pub fn process(&self) -> &dyn ProcessOperations {
        &*self.process_ops
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
