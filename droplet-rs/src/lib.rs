//! # droplet-rs: cell calling and hashtag demultiplexing for droplet single-cell data

#![deny(missing_docs)]
#![deny(warnings)]

/// Ambient (empty droplet) expression profile
pub mod ambient;

/// Cell Ranger 2 style cell calling from the barcode rank curve
pub mod default_drops;

/// Monte Carlo test of barcodes against the ambient profile
pub mod empty_drops;

/// Errors raised by the droplet algorithms
pub mod error;

/// Hashtag (HTO) demultiplexing of called cells
pub mod hash_demux;

/// MTX loading routines
pub mod mtx;

/// Cell calling followed by demultiplexing
pub mod pipeline;

/// Barcode rank curve, knee and inflection points
pub mod ranks;

mod rng;

pub use ambient::{estimate_ambient, AmbientProfile, AmbientSelection, AmbientSmoothing};
pub use default_drops::{default_drops, DefaultDrops};
pub use empty_drops::{
    DropletTest, EmptyDrops, EmptyDropsMetadata, EmptyDropsParams, EmptyDropsResult, Overdispersion, Retain,
};
pub use error::DropletError;
pub use hash_demux::{HashAssignment, HashDemux, HashDemuxParams, HashDemuxResult};
pub use ranks::{barcode_ranks, BarcodeRanks, RankParams};

pub use droplet_types::CountMatrix;
