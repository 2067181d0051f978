use crate::error::DropletError;
use droplet_stats::good_turing::good_turing_proportions;
use droplet_types::CountMatrix;
use log::debug;
use ndarray::Array1;

/// How the barcodes defining the ambient pool are chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmbientSelection {
    /// Barcodes with `0 < total <= lower`
    Lower(u64),
    /// Everything outside the `n` largest barcodes. Resolved to a `Lower` bound equal to the
    /// total of the `(n + 1)`-th largest barcode.
    ByRank(usize),
}

/// Optional smoothing of the pooled ambient counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AmbientSmoothing {
    /// Raw proportions; features never seen in the pool get zero
    #[default]
    None,
    /// Simple Good-Turing, giving unseen features a share of the singleton mass
    GoodTuring,
}

/// Expected composition of the cell-free background, one proportion per feature.
#[derive(Clone, Debug, PartialEq)]
pub struct AmbientProfile {
    proportions: Array1<f64>,
    lower: Option<u64>,
    barcodes: Vec<usize>,
}

impl AmbientProfile {
    /// Validate an externally supplied profile: finite, non-negative, positive sum. The
    /// proportions are rescaled to sum to one.
    pub fn from_proportions(proportions: Vec<f64>) -> Result<AmbientProfile, DropletError> {
        if proportions.is_empty() {
            return Err(DropletError::empty("ambient profile has no features"));
        }
        if proportions.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(DropletError::invalid(
                "ambient proportions must be finite and non-negative",
            ));
        }
        let sum: f64 = proportions.iter().sum();
        if sum <= 0.0 {
            return Err(DropletError::invalid("ambient proportions sum to zero"));
        }
        Ok(AmbientProfile {
            proportions: Array1::from(proportions) / sum,
            lower: None,
            barcodes: Vec::new(),
        })
    }

    /// Proportion of every feature
    pub fn proportions(&self) -> &Array1<f64> {
        &self.proportions
    }

    /// Proportion of feature `i`
    pub fn get(&self, i: usize) -> f64 {
        self.proportions[i]
    }

    /// Number of features
    pub fn len(&self) -> usize {
        self.proportions.len()
    }

    /// True if the profile covers no features
    pub fn is_empty(&self) -> bool {
        self.proportions.is_empty()
    }

    /// Ambient threshold the profile was estimated with; `None` for a supplied profile
    pub fn lower(&self) -> Option<u64> {
        self.lower
    }

    /// Barcodes pooled into the profile; empty for a supplied profile
    pub fn barcodes(&self) -> &[usize] {
        &self.barcodes
    }
}

/// Resolve a selection to the `lower` bound it stands for.
pub fn resolve_lower(totals: &[u64], selection: AmbientSelection) -> Result<u64, DropletError> {
    match selection {
        AmbientSelection::Lower(lower) => Ok(lower),
        AmbientSelection::ByRank(n) => {
            if n >= totals.len() {
                return Err(DropletError::invalid(format!(
                    "by_rank = {} leaves no barcodes among {}",
                    n,
                    totals.len()
                )));
            }
            let mut sorted = totals.to_vec();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            Ok(sorted[n])
        }
    }
}

/// Indices of barcodes with `0 < total <= lower`.
pub fn ambient_barcodes(totals: &[u64], lower: u64) -> Vec<usize> {
    totals
        .iter()
        .enumerate()
        .filter_map(|(i, &t)| (t > 0 && t <= lower).then_some(i))
        .collect()
}

/// Pool the counts of the selected barcodes into an ambient profile.
pub fn estimate_ambient(
    matrix: &CountMatrix,
    selection: AmbientSelection,
    smoothing: AmbientSmoothing,
) -> Result<AmbientProfile, DropletError> {
    let totals = matrix.totals();
    let lower = resolve_lower(&totals, selection)?;
    let pool = ambient_barcodes(&totals, lower);
    let sums = matrix.feature_sums(&pool);
    let grand: u64 = sums.iter().sum();
    if pool.is_empty() || grand == 0 {
        return Err(DropletError::InsufficientAmbientData {
            lower,
            n_barcodes: totals.len(),
        });
    }

    let proportions = match smoothing {
        AmbientSmoothing::None => sums.iter().map(|&s| s as f64 / grand as f64).collect(),
        AmbientSmoothing::GoodTuring => good_turing_proportions(&sums).ok_or_else(|| {
            DropletError::degenerate("Good-Turing smoothing of an empty pool")
        })?,
    };
    debug!(
        "ambient profile from {} barcodes with total <= {} ({} UMIs, {} features seen)",
        pool.len(),
        lower,
        grand,
        sums.iter().filter(|&&s| s > 0).count()
    );

    Ok(AmbientProfile {
        proportions: Array1::from(proportions),
        lower: Some(lower),
        barcodes: pool,
    })
}
