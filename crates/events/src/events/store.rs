use serde::{Deserialize, Serialize};

/// Store, garbage collection and profile events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreEvent {
    /// Mark phase finished
    GcMarked { live: usize, roots: usize },

    /// An unreferenced artifact was deleted
    GcRemoved { id: String, bytes: u64 },

    /// Sweep phase finished
    GcCompleted {
        removed: usize,
        entries_removed: u64,
        bytes_recovered: u64,
    },

    /// An artifact was merged into a profile
    ProfileLinked {
        profile: String,
        id: String,
        links: usize,
    },

    /// A non-directory entry already existed; first writer wins
    ProfileConflict {
        profile: String,
        path: String,
        existing: String,
    },

    /// An artifact's links were removed from a profile
    ProfileUnlinked {
        profile: String,
        id: String,
        links: usize,
    },
}
