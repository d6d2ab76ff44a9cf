#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Planning and executing installs for vessel
//!
//! The planner walks a recipe graph and decides, per id, whether it is
//! already in the store, can be restored from a car, or has to be built.
//! The executor then runs the plan in dependency order with bounded
//! parallelism, building recipes in private build directories and freezing
//! each artifact once it is complete.

mod archive;
mod builder;
mod env;
mod parallel;
mod plan;
mod runner;
mod staging;

pub use archive::{extract, ArchiveKind};
pub use builder::ScriptBuilder;
pub use env::{BuildEnv, BUILD_HOME, SYSTEM_PATH};
pub use parallel::InstallExecutor;
pub use plan::{topological_order, CarInstall, Installer, PackagesToInstall, Planner};
pub use runner::StatementRunner;
pub use staging::{build_root, descend_single, Stager};
