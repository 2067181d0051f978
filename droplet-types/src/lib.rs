//! Count matrix types shared by the droplet-rs crates

#![deny(warnings)]

pub mod feature_types;
pub mod matrix;

pub use feature_types::FeatureTypes;
pub use matrix::{CountCsc, CountMatrix};
