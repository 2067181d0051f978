//! Assign cells to samples from their hashtag counts. Each tag's ambient contribution is
//! removed before comparing the best tag against the runner-up; a runner-up that is itself
//! well above its ambient level marks a doublet.

use crate::ambient::AmbientProfile;
use crate::error::DropletError;
use droplet_stats::Statistics;
use droplet_types::CountMatrix;
use log::{debug, info};
use ndarray::{Array2, ArrayView1, Axis};
use noisy_float::prelude::*;
use rayon::prelude::*;
use smart_default::SmartDefault;
use std::cmp::Reverse;

/// Parameters of hashtag demultiplexing
#[derive(Clone, Debug, SmartDefault)]
pub struct HashDemuxParams {
    /// Use this tag profile instead of estimating one from the cells
    #[default(None)]
    pub ambient: Option<AmbientProfile>,

    /// Added to both sides of every fold change
    #[default = 5.0]
    pub pseudo_count: f64,

    /// Minimum log2 fold change of the best tag over the second for a confident call
    #[default = 1.0]
    pub confident_min_logfc: f64,

    /// Confident calls can't be more than this many MADs below the median log2 fold change
    #[default(Some(3.0))]
    pub confident_nmads: Option<f64>,

    /// Minimum log2 fold change of the second tag over its ambient level for a doublet
    #[default = 1.0]
    pub doublet_min_logfc2: f64,

    /// Doublets must be more than this many MADs above the median second-tag fold change
    #[default(Some(3.0))]
    pub doublet_nmads: Option<f64>,
}

impl HashDemuxParams {
    fn validate(&self) -> Result<(), DropletError> {
        if !(self.pseudo_count.is_finite() && self.pseudo_count >= 0.0) {
            return Err(DropletError::invalid(format!(
                "pseudo_count {} must be finite and non-negative",
                self.pseudo_count
            )));
        }
        if self.confident_nmads.is_some_and(|n| n < 0.0) || self.doublet_nmads.is_some_and(|n| n < 0.0) {
            return Err(DropletError::invalid("nmads must be non-negative"));
        }
        Ok(())
    }
}

/// Sample assignment of one cell
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct HashAssignment {
    /// Barcode identifier
    pub barcode: String,
    /// Total hashtag count
    pub total: u64,
    /// Tag with the largest ambient-corrected count
    pub best: usize,
    /// Runner-up tag; `None` with a single tag
    pub second: Option<usize>,
    /// log2 fold change of the best tag over the second
    pub log_fc: f64,
    /// log2 fold change of the second tag over its ambient level
    pub log_fc2: Option<f64>,
    /// The best tag is a confident assignment
    pub confident: bool,
    /// Looks like two samples in one droplet
    pub doublet: bool,
}

/// Assignments of all cells with the tag ambient model used
#[derive(Clone, Debug)]
pub struct HashDemuxResult {
    /// One entry per cell, in column order
    pub assignments: Vec<HashAssignment>,
    /// Tag names, indexed by `best` and `second`
    pub tags: Vec<String>,
    /// Ambient tag proportions
    pub ambient: AmbientProfile,
    /// Ambient scale: expected ambient count of tag `t` is `lambda * ambient[t]`
    pub lambda: f64,
}

impl HashDemuxResult {
    /// Name of tag `t`
    pub fn tag_name(&self, t: usize) -> &str {
        &self.tags[t]
    }

    /// Number of confident assignments
    pub fn n_confident(&self) -> usize {
        self.assignments.iter().filter(|a| a.confident).count()
    }

    /// Number of doublets
    pub fn n_doublets(&self) -> usize {
        self.assignments.iter().filter(|a| a.doublet).count()
    }
}

/// Mean raw count of the low class of the best two-class split of `ln(1 + count)`.
fn background_level(tag: &str, counts: ArrayView1<f64>) -> Result<f64, DropletError> {
    let mut raw: Vec<f64> = counts.to_vec();
    raw.sort_by(f64::total_cmp);
    let logs: Vec<f64> = raw.iter().map(|x| x.ln_1p()).collect();
    let n = logs.len();

    let (mut sum, mut sum_sq, mut sum_raw) = (vec![0.0; n + 1], vec![0.0; n + 1], vec![0.0; n + 1]);
    for i in 0..n {
        sum[i + 1] = sum[i] + logs[i];
        sum_sq[i + 1] = sum_sq[i] + logs[i] * logs[i];
        sum_raw[i + 1] = sum_raw[i] + raw[i];
    }
    let within = |from: usize, to: usize| {
        let k = (to - from) as f64;
        let s = sum[to] - sum[from];
        (sum_sq[to] - sum_sq[from]) - s * s / k
    };

    let mut best: Option<(usize, f64)> = None;
    for split in 1..n {
        if logs[split - 1] == logs[split] {
            continue;
        }
        let ss = within(0, split) + within(split, n);
        if best.map_or(true, |(_, b)| ss < b) {
            best = Some((split, ss));
        }
    }
    let Some((split, _)) = best else {
        return Err(DropletError::DegenerateTag {
            tag: tag.to_string(),
            reason: format!("all {} cells have the same count", n),
        });
    };
    debug!("tag {}: {} of {} cells in the background class", tag, split, n);
    Ok(sum_raw[split] / split as f64)
}

/// Ambient scale implied by a supplied profile: the median over cells of the smallest
/// count-to-ambient ratio, taking each cell's least enriched tag as background only.
fn scale_from_profile(counts: &Array2<f64>, ambient: &AmbientProfile) -> f64 {
    let ratios: Vec<f64> = counts
        .axis_iter(Axis(1))
        .map(|cell| {
            cell.iter()
                .zip(ambient.proportions())
                .filter(|&(_, &a)| a > 0.0)
                .map(|(&x, &a)| x / a)
                .fold(f64::INFINITY, f64::min)
        })
        .collect();
    ratios.median()
}

/// Hashtag demultiplexer
#[derive(Clone, Debug, Default)]
pub struct HashDemux {
    /// Parameters
    pub params: HashDemuxParams,
}

impl HashDemux {
    /// Demultiplexer with the given parameters
    pub fn new(params: HashDemuxParams) -> HashDemux {
        HashDemux { params }
    }

    /// Assign every column of `hto`, a tags x cells count matrix.
    pub fn run(&self, hto: &CountMatrix) -> Result<HashDemuxResult, DropletError> {
        let params = &self.params;
        params.validate()?;
        let (n_tags, n_cells) = hto.shape();
        if n_cells == 0 {
            return Err(DropletError::empty("hashtag matrix has no cells"));
        }
        if n_tags == 0 {
            return Err(DropletError::empty("hashtag matrix has no tags"));
        }

        let mut counts = Array2::<f64>::zeros((n_tags, n_cells));
        for c in 0..n_cells {
            for (t, v) in hto.column(c) {
                counts[[t, c]] = f64::from(v);
            }
        }

        let (ambient, lambda) = match &params.ambient {
            Some(profile) if profile.len() != n_tags => {
                return Err(DropletError::invalid(format!(
                    "ambient profile has {} tags, matrix has {}",
                    profile.len(),
                    n_tags
                )))
            }
            Some(profile) => (profile.clone(), scale_from_profile(&counts, profile)),
            None => {
                let levels = (0..n_tags)
                    .into_par_iter()
                    .map(|t| background_level(&hto.feature_names[t], counts.row(t)))
                    .collect::<Result<Vec<f64>, DropletError>>()?;
                let lambda: f64 = levels.iter().sum();
                let proportions = if lambda > 0.0 { levels } else { vec![1.0; n_tags] };
                (AmbientProfile::from_proportions(proportions)?, lambda)
            }
        };
        info!("hashtag ambient scale {:.2} over {} tags", lambda, n_tags);

        let pc = params.pseudo_count;
        let expected: Vec<f64> = ambient.proportions().iter().map(|a| lambda * a).collect();
        let totals = hto.totals();
        let mut assignments: Vec<HashAssignment> = (0..n_cells)
            .into_par_iter()
            .map(|c| {
                let corrected: Vec<f64> = counts
                    .column(c)
                    .iter()
                    .zip(&expected)
                    .map(|(&x, &e)| (x - e).max(0.0))
                    .collect();
                let mut order: Vec<usize> = (0..n_tags).collect();
                order.sort_by_key(|&t| (Reverse(n64(corrected[t])), t));
                let best = order[0];
                let second = order.get(1).copied();

                let second_level = second.map_or(0.0, |s| corrected[s]);
                let log_fc = ((corrected[best] + pc) / (second_level + pc)).log2();
                let log_fc2 = second.map(|s| ((corrected[s] + pc) / (expected[s] + pc)).log2());
                HashAssignment {
                    barcode: hto.barcodes[c].clone(),
                    total: totals[c],
                    best,
                    second,
                    log_fc,
                    log_fc2,
                    confident: false,
                    doublet: false,
                }
            })
            .collect();

        let log_fc2: Vec<f64> = assignments.iter().filter_map(|a| a.log_fc2).collect();
        let doublet_floor = match params.doublet_nmads {
            Some(nmads) if !log_fc2.is_empty() => {
                params.doublet_min_logfc2.max(log_fc2.median() + nmads * log_fc2.mad())
            }
            _ => params.doublet_min_logfc2,
        };
        let log_fc: Vec<f64> = assignments.iter().map(|a| a.log_fc).collect();
        let confident_floor = match params.confident_nmads {
            Some(nmads) => params.confident_min_logfc.max(log_fc.median() - nmads * log_fc.mad()),
            None => params.confident_min_logfc,
        };

        for a in &mut assignments {
            a.doublet = a.log_fc2.is_some_and(|v| {
                v >= params.doublet_min_logfc2 && (params.doublet_nmads.is_none() || v > doublet_floor)
            });
            a.confident = !a.doublet && a.log_fc >= confident_floor;
        }

        let result = HashDemuxResult {
            assignments,
            tags: hto.feature_names.clone(),
            ambient,
            lambda,
        };
        info!(
            "{} cells: {} confident, {} doublets",
            n_cells,
            result.n_confident(),
            result.n_doublets()
        );
        Ok(result)
    }
}
