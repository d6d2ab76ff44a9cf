#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Car archives for vessel
//!
//! A car is the portable, signed form of one stored artifact. This crate
//! packs artifacts into cars, verifies and restores them into a store,
//! locates cars published by a repository, and pushes local cars to a
//! remote store.

mod archive;
mod calc;
mod lookup;
mod pack;
mod upload;

pub use archive::{check_magic, read_car, write_car, MAGIC, PLACEHOLDER};
pub use calc::{CarCalcSet, CarToInstall};
pub use lookup::{CarData, CarLookup, CarReader, DirCarReader, HttpCarReader, CONFIG_DOCUMENT};
pub use pack::{car_file_name, info_file_name, CarPacker, CarUnpacker};
pub use upload::{CarUploader, CAR_CONTENT_TYPE, INFO_CONTENT_TYPE};
