#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::needless_lifetimes)]

//! Starlark recipe handling for vessel
//!
//! Recipes are located through an ordered list of local and remote back-ends,
//! evaluated against the frozen exports of the recipes they load, and
//! identified by a content signature. Install and hook procedures are
//! recorded as [`Statement`] trees rather than executed during evaluation.

mod loader;
mod lookup;
mod package;
mod signature;
mod statement;
mod values;

pub use loader::{helpers_asset, sums_asset, Evaluated, Inspection, ScriptLoader, EXPORT_NAME};
pub use lookup::{
    candidate_layouts, optional_asset, DirScriptData, RemoteScriptData, ScriptData, ScriptLookup,
    EXTENSION,
};
pub use package::{Input, InputSource, InputSpec, ScriptPackage, SumsFile};
pub use signature::{hash_dir, InputDigest, SignatureInput, DEFAULT_INPUT, UNKNOWN_VERSION};
pub use statement::{
    code_hash, validate, Bindings, Statement, BUILD_VAR, PREFIX_VAR, STORE_VAR, TOP_VAR,
};
pub use values::{PackageValue, RunCtx};
