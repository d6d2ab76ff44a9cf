#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Resource management for vessel
//!
//! Builds run concurrently up to a bound derived from the host and the
//! configuration. This crate computes that bound and hands out the
//! semaphore permits that enforce it.

pub mod limits;
pub mod manager;
pub mod semaphore;

pub use limits::{parallelism, ResourceLimits, MAX_PARALLELISM};
pub use manager::ResourceManager;
pub use semaphore::{acquire_semaphore_permit, create_semaphore, try_acquire_semaphore_permit};
