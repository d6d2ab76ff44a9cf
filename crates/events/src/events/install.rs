use serde::{Deserialize, Serialize};
use vessel_types::InstallState;

use super::FailureContext;

/// Install planning and execution events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InstallEvent {
    /// A plan was computed for the given roots
    PlanComputed {
        roots: Vec<String>,
        install_order: Vec<String>,
        installed: usize,
    },

    /// An id moved through its install state machine
    StateChanged { id: String, state: InstallState },

    /// A recipe hook ran against a dependent's environment
    HookApplied { id: String, dependency: String },

    /// A line of build output
    CommandOutput { id: String, line: String },

    /// An id's installer failed and its artifact was removed
    Failed { id: String, failure: FailureContext },

    /// An id was not attempted because a dependency failed
    Skipped { id: String, dependency: String },

    /// The whole plan finished
    Completed {
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
}
