#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Platform abstraction layer for vessel builds.
//!
//! This crate provides a unified interface for host-specific operations:
//! - Binary inspection and name patching (Mach-O load commands, `install_name_tool`)
//! - Cancellable process execution with streamed output events
//! - Filesystem helpers for mirroring, freezing and removing store trees

pub mod binary;
pub mod core;
pub mod fs;
pub mod implementations;
pub mod process;

pub use core::{Platform, PlatformContext};

/// Re-export commonly used types
pub use binary::{
    detect_format, host_format, is_host_binary, relocate_references, BinaryFormat,
    BinaryOperations,
};
pub use process::{CommandOutput, PlatformCommand, ProcessOperations};
