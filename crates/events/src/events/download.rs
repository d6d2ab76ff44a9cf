use serde::{Deserialize, Serialize};

/// Input and car transfer events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DownloadEvent {
    /// Transfer started
    Started {
        url: String,
        total_size: Option<u64>,
    },

    /// Transfer finished and verified
    Completed { url: String, final_size: u64 },

    /// Cached copy reused without a transfer
    CacheHit { url: String },

    /// Transient failure, another attempt follows
    Retrying {
        url: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    /// Bytes did not match the recorded sum; the cache copy was deleted
    HashMismatch {
        url: String,
        expected: String,
        actual: String,
    },
}
