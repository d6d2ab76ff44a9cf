//! Host implementations of the platform traits

pub mod binary;
pub mod process;

pub use binary::HostBinaryOperations;
pub use process::HostProcessOperations;
