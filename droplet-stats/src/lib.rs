//! Statistical building blocks for droplet calling
#![deny(missing_docs)]
#![deny(warnings)]

/// log-probabilities of the multinomial family
pub mod dist;
/// Simple Good-Turing frequency estimation
pub mod good_turing;
/// multiple testing correction
pub mod multiple_testing;
/// statistics extension
pub mod stat;

pub use crate::multiple_testing::adjusted_pvalue_bh;
pub use crate::stat::Statistics;
pub use statrs::function::gamma::ln_gamma;
