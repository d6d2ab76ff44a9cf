use serde::{Deserialize, Serialize};

/// Car packing, unpacking and lookup events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CarEvent {
    /// A car was written
    Packed {
        id: String,
        path: String,
        size: u64,
        dependencies: usize,
    },

    /// A car was verified and extracted
    Unpacked { id: String, signer: String },

    /// A car and its info record were pushed to a remote store
    Uploaded {
        id: String,
        url: String,
        etag: Option<String>,
    },

    /// A car location was resolved
    Found { id: String, url: String },

    /// No car exists for the id; the planner falls back to building
    NotFound { id: String, repo: String },
}
