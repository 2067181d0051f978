//! Test every barcode against the ambient model. A barcode's count vector is scored by its
//! Dirichlet-multinomial log-probability under the ambient profile; barcodes that are
//! improbably far from the ambient composition are called as cells after Benjamini-Hochberg
//! correction.

mod monte_carlo;
mod overdispersion;

use crate::ambient::{
    ambient_barcodes, estimate_ambient, resolve_lower, AmbientProfile, AmbientSelection, AmbientSmoothing,
};
use crate::error::DropletError;
use crate::ranks::{barcode_ranks, BarcodeRanks, RankParams};
use droplet_stats::adjusted_pvalue_bh;
use droplet_stats::dist::dirichlet_multinomial_log_pmf;
use droplet_types::CountMatrix;
use log::{debug, info, warn};
use monte_carlo::{count_at_most, NullModel, TotalGroups};
use overdispersion::Profile;
use rayon::prelude::*;
use smart_default::SmartDefault;

/// Concentration of the Dirichlet-multinomial null.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Overdispersion {
    /// Maximum likelihood fit on the ambient barcodes
    #[default]
    Estimate,
    /// Fixed concentration
    Fixed(f64),
    /// No overdispersion: a plain multinomial null
    Multinomial,
}

/// Barcodes at or above this total are called without testing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retain {
    /// Explicit total
    Total(u64),
    /// The knee of the barcode rank curve
    Knee,
}

/// Parameters of the empty droplet test
#[derive(Clone, Debug, SmartDefault)]
pub struct EmptyDropsParams {
    /// Barcodes with `0 < total <= lower` define the ambient pool. `None` takes the
    /// suggestion of the barcode rank curve.
    #[default(Some(100))]
    pub lower: Option<u64>,

    /// Assume at most this many cells; takes precedence over `lower`
    #[default(None)]
    pub by_rank: Option<usize>,

    /// Monte Carlo iterations
    #[default = 10_000]
    pub n_iter: usize,

    /// Barcodes with a BH-adjusted p-value at or below this are cells
    #[default = 0.001]
    pub fdr_threshold: f64,

    /// Also test the barcodes of the ambient pool
    #[default = false]
    pub test_ambient: bool,

    /// Concentration of the null
    #[default(Overdispersion::Estimate)]
    pub overdispersion: Overdispersion,

    /// Shortcut for very large barcodes
    #[default(None)]
    pub retain: Option<Retain>,

    /// Smoothing of the estimated ambient profile
    #[default(AmbientSmoothing::None)]
    pub smoothing: AmbientSmoothing,

    /// Use this profile instead of estimating one
    #[default(None)]
    pub ambient: Option<AmbientProfile>,

    /// Rank curve fit, for the knee and inflection
    #[default(RankParams::default())]
    pub ranks: RankParams,

    /// Random seed
    #[default = 0]
    pub seed: u64,
}

impl EmptyDropsParams {
    fn validate(&self) -> Result<(), DropletError> {
        if self.n_iter == 0 {
            return Err(DropletError::invalid("n_iter must be positive"));
        }
        if !(self.fdr_threshold > 0.0 && self.fdr_threshold < 1.0) {
            return Err(DropletError::invalid(format!(
                "fdr_threshold {} not in (0, 1)",
                self.fdr_threshold
            )));
        }
        if let Overdispersion::Fixed(alpha) = self.overdispersion {
            if !(alpha.is_finite() && alpha > 0.0) {
                return Err(DropletError::invalid(format!(
                    "fixed alpha {} must be finite and positive",
                    alpha
                )));
            }
        }
        Ok(())
    }
}

/// Test outcome of one barcode. The optional fields are `None` for barcodes that were not
/// tested.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct DropletTest {
    /// Barcode identifier
    pub barcode: String,
    /// Total count over all features
    pub total: u64,
    /// Monte Carlo p-value
    pub p_value: Option<f64>,
    /// Benjamini-Hochberg adjusted p-value
    pub fdr: Option<f64>,
    /// The p-value is the smallest the iterations can produce
    pub limited: Option<bool>,
    /// Called as a cell
    pub is_cell: bool,
}

/// Matrix-level outputs of a run
#[derive(Clone, Debug)]
pub struct EmptyDropsMetadata {
    /// Knee of the rank curve, if one could be fitted
    pub knee: Option<f64>,
    /// Inflection of the rank curve, if one could be fitted
    pub inflection: Option<f64>,
    /// Profile the barcodes were tested against
    pub ambient: AmbientProfile,
    /// Concentration of the null, infinite for a multinomial
    pub alpha: f64,
    /// Resolved ambient threshold
    pub lower: u64,
    /// Monte Carlo iterations
    pub n_iter: usize,
    /// Random seed
    pub seed: u64,
}

/// Per-barcode outcomes, in matrix column order, and run metadata
#[derive(Clone, Debug)]
pub struct EmptyDropsResult {
    /// One entry per barcode
    pub barcodes: Vec<DropletTest>,
    /// Matrix-level outputs
    pub metadata: EmptyDropsMetadata,
}

impl EmptyDropsResult {
    /// Column indices of the called cells
    pub fn called(&self) -> Vec<usize> {
        self.barcodes
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.is_cell.then_some(i))
            .collect()
    }

    /// Number of tested barcodes
    pub fn n_tested(&self) -> usize {
        self.barcodes.iter().filter(|b| b.p_value.is_some()).count()
    }
}

/// Empty droplet test
#[derive(Clone, Debug, Default)]
pub struct EmptyDrops {
    /// Parameters
    pub params: EmptyDropsParams,
}

impl EmptyDrops {
    /// Tester with the given parameters
    pub fn new(params: EmptyDropsParams) -> EmptyDrops {
        EmptyDrops { params }
    }

    /// Test every barcode of `matrix`.
    pub fn run(&self, matrix: &CountMatrix) -> Result<EmptyDropsResult, DropletError> {
        let params = &self.params;
        params.validate()?;
        if matrix.cols() == 0 {
            return Err(DropletError::empty("count matrix has no barcodes"));
        }
        if matrix.rows() == 0 {
            return Err(DropletError::empty("count matrix has no features"));
        }

        let totals = matrix.totals();
        let ranks = match barcode_ranks(&totals, &params.ranks) {
            Ok(r) => Some(r),
            Err(e) => {
                debug!("no barcode rank curve: {}", e);
                None
            }
        };

        let lower = match (params.by_rank, params.lower) {
            (Some(n), _) => resolve_lower(&totals, AmbientSelection::ByRank(n))?,
            (None, Some(lower)) => lower,
            (None, None) => ranks.as_ref().map(BarcodeRanks::suggested_lower).ok_or_else(|| {
                DropletError::invalid("lower is unset and the barcode rank curve is too short to suggest one")
            })?,
        };
        let pool = ambient_barcodes(&totals, lower);

        let ambient = match &params.ambient {
            Some(profile) if profile.len() != matrix.rows() => {
                return Err(DropletError::invalid(format!(
                    "ambient profile has {} features, matrix has {}",
                    profile.len(),
                    matrix.rows()
                )))
            }
            Some(profile) => profile.clone(),
            None => estimate_ambient(matrix, AmbientSelection::Lower(lower), params.smoothing)?,
        };
        info!("ambient pool: {} barcodes with total <= {}", pool.len(), lower);

        let retain = match params.retain {
            None => None,
            Some(Retain::Total(t)) => Some(t),
            Some(Retain::Knee) => Some(
                ranks
                    .as_ref()
                    .map(|r| r.knee.ceil() as u64)
                    .ok_or_else(|| DropletError::invalid("retain at the knee needs a barcode rank curve"))?,
            ),
        };

        // the null only draws features present in the ambient profile
        let prop = ambient.proportions();
        let kept: Vec<bool> = prop.iter().map(|&p| p > 0.0).collect();
        let kept_prop: Vec<f64> = prop.iter().copied().filter(|&p| p > 0.0).collect();
        let profile_of = |col: usize| -> Profile {
            matrix
                .column(col)
                .filter(|&(row, _)| kept[row])
                .map(|(row, count)| (prop[row], count))
                .collect()
        };

        let alpha = match params.overdispersion {
            Overdispersion::Fixed(alpha) => alpha,
            Overdispersion::Multinomial => f64::INFINITY,
            Overdispersion::Estimate => {
                if pool.is_empty() {
                    return Err(DropletError::degenerate(format!(
                        "no barcodes with 0 < total <= {} to fit the overdispersion",
                        lower
                    )));
                }
                let profiles: Vec<Profile> = pool.par_iter().map(|&c| profile_of(c)).collect();
                overdispersion::estimate_alpha(&profiles)?
            }
        };
        info!("ambient concentration alpha = {:.3}", alpha);

        let candidates: Vec<usize> = (0..totals.len())
            .filter(|&i| totals[i] > 0 && (params.test_ambient || totals[i] > lower))
            .collect();
        let (observed, test_totals): (Vec<f64>, Vec<u64>) = candidates
            .par_iter()
            .map(|&c| {
                // counts on a feature with zero ambient proportion score -inf
                let entries: Profile = matrix.column(c).map(|(row, count)| (prop[row], count)).collect();
                (dirichlet_multinomial_log_pmf(entries, alpha), totals[c])
            })
            .unzip();

        let n_le = if candidates.is_empty() {
            Vec::new()
        } else {
            info!(
                "testing {} barcodes with {} iterations",
                candidates.len(),
                params.n_iter
            );
            let model = NullModel::new(kept_prop, alpha);
            let groups = TotalGroups::new(&test_totals, &observed);
            count_at_most(&model, &groups, params.n_iter, params.seed)
        };

        let n1 = (params.n_iter + 1) as f64;
        let tested: Vec<(usize, f64, bool)> = candidates
            .iter()
            .zip(&n_le)
            .map(|(&c, &n)| match retain {
                Some(r) if totals[c] >= r => (c, 0.0, false),
                _ => (c, (n as f64 + 1.0) / n1, n == 0),
            })
            .collect();
        let fdr = adjusted_pvalue_bh(&tested.iter().map(|&(c, p, _)| (c, p)).collect::<Vec<_>>());

        let mut barcodes: Vec<DropletTest> = totals
            .iter()
            .zip(&matrix.barcodes)
            .map(|(&total, barcode)| DropletTest {
                barcode: barcode.clone(),
                total,
                p_value: None,
                fdr: None,
                limited: None,
                is_cell: false,
            })
            .collect();
        for (&(c, p, limited), &(_, q)) in tested.iter().zip(&fdr) {
            let b = &mut barcodes[c];
            b.p_value = Some(p);
            b.fdr = Some(q);
            b.limited = Some(limited);
            b.is_cell = q <= params.fdr_threshold;
        }

        let n_called = barcodes.iter().filter(|b| b.is_cell).count();
        let n_limited = barcodes
            .iter()
            .filter(|b| b.limited == Some(true) && !b.is_cell)
            .count();
        if n_limited > 0 {
            warn!(
                "{} barcodes sit at the smallest attainable p-value but were not called, consider raising n_iter",
                n_limited
            );
        }
        info!(
            "called {} cells among {} tested barcodes at FDR {}",
            n_called,
            tested.len(),
            params.fdr_threshold
        );

        Ok(EmptyDropsResult {
            barcodes,
            metadata: EmptyDropsMetadata {
                knee: ranks.as_ref().map(|r| r.knee),
                inflection: ranks.as_ref().map(|r| r.inflection),
                ambient,
                alpha,
                lower,
                n_iter: params.n_iter,
                seed: params.seed,
            },
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn small() -> CountMatrix {
        // one large barcode, four small ones and an empty one
        CountMatrix::from_dense_rows(&[
            vec![600, 2, 1, 2, 1, 0],
            vec![5, 2, 2, 1, 1, 0],
            vec![3, 1, 1, 1, 2, 0],
        ])
    }

    fn params() -> EmptyDropsParams {
        EmptyDropsParams {
            lower: Some(5),
            n_iter: 999,
            ..EmptyDropsParams::default()
        }
    }

    #[test]
    fn test_defaults() {
        let p = EmptyDropsParams::default();
        assert_eq!(p.lower, Some(100));
        assert_eq!(p.n_iter, 10_000);
        assert_eq!(p.fdr_threshold, 0.001);
        assert_eq!(p.overdispersion, Overdispersion::Estimate);
        assert!(p.retain.is_none());
        assert_eq!(p.ranks.span, 0.2);
    }

    #[test]
    fn test_small() {
        let result = EmptyDrops::new(params()).run(&small()).unwrap();
        assert_eq!(result.called(), vec![0]);
        assert_eq!(result.n_tested(), 1);
        let big = &result.barcodes[0];
        assert_eq!(big.p_value, Some(0.001));
        assert_eq!(big.limited, Some(true));
        for b in &result.barcodes[1..] {
            assert!(b.p_value.is_none() && b.fdr.is_none() && b.limited.is_none());
            assert!(!b.is_cell);
        }
        assert_eq!(result.metadata.lower, 5);
        assert!(result.metadata.alpha > 0.0);
    }

    #[test]
    fn test_test_ambient_skips_empty() {
        let p = EmptyDropsParams {
            test_ambient: true,
            ..params()
        };
        let result = EmptyDrops::new(p).run(&small()).unwrap();
        assert_eq!(result.n_tested(), 5);
        assert!(result.barcodes[5].p_value.is_none());
        for b in &result.barcodes[..5] {
            assert!(b.fdr.unwrap() >= b.p_value.unwrap());
        }
    }

    #[test]
    fn test_retain() {
        let p = EmptyDropsParams {
            retain: Some(Retain::Total(600)),
            overdispersion: Overdispersion::Multinomial,
            ..params()
        };
        let result = EmptyDrops::new(p).run(&small()).unwrap();
        assert_eq!(result.barcodes[0].p_value, Some(0.0));
        assert_eq!(result.barcodes[0].limited, Some(false));
        assert!(result.metadata.alpha.is_infinite());
    }

    #[test]
    fn test_invalid() {
        let m = small();
        let bad = [
            EmptyDropsParams {
                n_iter: 0,
                ..params()
            },
            EmptyDropsParams {
                fdr_threshold: 1.0,
                ..params()
            },
            EmptyDropsParams {
                overdispersion: Overdispersion::Fixed(-1.0),
                ..params()
            },
            EmptyDropsParams {
                ambient: Some(AmbientProfile::from_proportions(vec![0.5, 0.5]).unwrap()),
                ..params()
            },
        ];
        for p in bad {
            assert!(matches!(
                EmptyDrops::new(p).run(&m),
                Err(DropletError::InvalidParameters { .. })
            ));
        }

        // two distinct totals can't suggest a lower bound
        let p = EmptyDropsParams {
            lower: None,
            ..params()
        };
        let flat = CountMatrix::from_dense_rows(&[vec![50, 2, 2, 0]]);
        assert!(matches!(
            EmptyDrops::new(p).run(&flat),
            Err(DropletError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn test_ambient_errors() {
        let m = small();
        let p = EmptyDropsParams {
            lower: Some(0),
            ..params()
        };
        assert!(matches!(
            EmptyDrops::new(p).run(&m),
            Err(DropletError::InsufficientAmbientData { lower: 0, .. })
        ));

        // a supplied profile doesn't need the pool, the concentration fit does
        let ambient = AmbientProfile::from_proportions(vec![0.4, 0.4, 0.2]).ok();
        let p = EmptyDropsParams {
            lower: Some(0),
            ambient: ambient.clone(),
            ..params()
        };
        assert!(matches!(
            EmptyDrops::new(p).run(&m),
            Err(DropletError::DegenerateAmbientModel { .. })
        ));
        let p = EmptyDropsParams {
            lower: Some(0),
            ambient,
            overdispersion: Overdispersion::Fixed(50.0),
            ..params()
        };
        assert_eq!(EmptyDrops::new(p).run(&m).unwrap().n_tested(), 5);

        let empty = CountMatrix::from_dense_rows(&[vec![], vec![]]);
        assert!(matches!(
            EmptyDrops::default().run(&empty),
            Err(DropletError::EmptyInput { .. })
        ));
    }

    /// Three features split in fixed proportions, totals following the rank curve fixture.
    fn curve_matrix() -> (CountMatrix, Vec<u64>) {
        let totals = crate::ranks::curve();
        let rows: Vec<Vec<u32>> = (0..3)
            .map(|f| {
                totals
                    .iter()
                    .map(|&t| {
                        let (a, b) = (t / 2, t / 3);
                        [a, b, t - a - b][f] as u32
                    })
                    .collect()
            })
            .collect();
        (CountMatrix::from_dense_rows(&rows), totals)
    }

    #[test]
    fn test_lower_from_rank_curve() {
        let (m, totals) = curve_matrix();
        let suggested = barcode_ranks(&totals, &RankParams::default()).unwrap().suggested_lower();
        let p = EmptyDropsParams {
            lower: None,
            n_iter: 20,
            ..EmptyDropsParams::default()
        };
        let result = EmptyDrops::new(p).run(&m).unwrap();
        assert_eq!(result.metadata.lower, suggested);
        assert!(result.metadata.knee.is_some());
        let above = totals.iter().filter(|&&t| t > suggested).count();
        assert_eq!(result.n_tested(), above);
        assert!(above > 0);

        // an explicit bound wins over the curve
        let p = EmptyDropsParams {
            lower: Some(30),
            n_iter: 20,
            ..EmptyDropsParams::default()
        };
        let result = EmptyDrops::new(p).run(&m).unwrap();
        assert_eq!(result.metadata.lower, 30);
        assert!(result.metadata.knee.is_some());
        assert_ne!(suggested, 30);
    }

    #[test]
    fn test_retain_at_knee() {
        let (m, totals) = curve_matrix();
        let p = EmptyDropsParams {
            lower: Some(100),
            n_iter: 20,
            retain: Some(Retain::Knee),
            ..EmptyDropsParams::default()
        };
        let result = EmptyDrops::new(p).run(&m).unwrap();
        let knee = result.metadata.knee.unwrap().ceil() as u64;
        let mut n_retained = 0;
        for (b, &t) in result.barcodes.iter().zip(&totals) {
            if t >= knee {
                n_retained += 1;
                assert_eq!(b.p_value, Some(0.0));
                assert_eq!(b.limited, Some(false));
                assert!(b.is_cell);
            } else if t > 100 {
                assert!(b.p_value.unwrap() > 0.0);
            }
        }
        assert!(n_retained > 0);
    }

    #[test]
    fn test_unprofiled_features_reject() {
        // feature 2 never appears in the pool, so any count on it is impossible under the null
        let m = CountMatrix::from_dense_rows(&[
            vec![22, 0, 2, 1, 2, 1],
            vec![28, 0, 2, 2, 1, 3],
            vec![900, 10_000, 0, 0, 0, 0],
        ]);
        for smoothing in [AmbientSmoothing::None, AmbientSmoothing::GoodTuring] {
            let p = EmptyDropsParams {
                lower: Some(5),
                n_iter: 999,
                smoothing,
                ..EmptyDropsParams::default()
            };
            let result = EmptyDrops::new(p).run(&m).unwrap();
            assert_eq!(result.metadata.ambient.get(2), 0.0);
            assert_eq!(result.called(), vec![0, 1]);
            for b in &result.barcodes[..2] {
                assert_eq!(b.p_value, Some(0.001));
                assert_eq!(b.limited, Some(true));
            }
        }
    }
}
