//! Barcode rank curve. Totals are plotted against their rank on log-log axes, smoothed with
//! a local linear regression and differentiated. The inflection is the steepest point of the
//! fitted curve; the knee is the point of the curve above it that bulges furthest from the
//! straight line joining the top of the curve to the inflection.

use crate::error::DropletError;
use smart_default::SmartDefault;

/// Parameters of the rank curve fit
#[derive(Clone, Debug, PartialEq, SmartDefault)]
pub struct RankParams {
    /// Only totals strictly above this value take part in the fit
    #[default = 0]
    pub min_total: u64,

    /// Restrict the fit to totals inside `(low, high)`
    #[default(None)]
    pub fit_bounds: Option<(f64, f64)>,

    /// Fraction of the curve points used for each local regression
    #[default = 0.2]
    pub span: f64,
}

/// Rank statistics of every barcode and the two landmark totals.
#[derive(Clone, Debug, PartialEq)]
pub struct BarcodeRanks {
    /// Rank of every barcode, 1 for the largest total, ties sharing their average rank
    pub rank: Vec<f64>,
    /// Total of every barcode
    pub total: Vec<u64>,
    /// Smoothed total for barcodes that took part in the fit
    pub fitted: Vec<Option<f64>>,
    /// Total at the knee of the fitted curve
    pub knee: f64,
    /// Total at the inflection of the fitted curve
    pub inflection: f64,
}

impl BarcodeRanks {
    /// A `lower` bound for ambient selection: the inflection total, rounded down.
    pub fn suggested_lower(&self) -> u64 {
        self.inflection.floor() as u64
    }
}

/// Average rank of each total, largest first.
fn average_ranks(totals: &[u64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..totals.len()).collect();
    order.sort_by(|&a, &b| totals[b].cmp(&totals[a]));
    let mut rank = vec![0.0; totals.len()];
    let mut start = 0;
    while start < order.len() {
        let t = totals[order[start]];
        let end = start + order[start..].iter().take_while(|&&i| totals[i] == t).count();
        // ranks start + 1 ..= end
        let avg = (start + 1 + end) as f64 / 2.0;
        for &i in &order[start..end] {
            rank[i] = avg;
        }
        start = end;
    }
    rank
}

/// Local linear regression with tricube weights, evaluated at every `x`. `x` must be sorted.
fn local_linear(x: &[f64], y: &[f64], span: f64) -> Vec<f64> {
    let n = x.len();
    let k = ((span * n as f64).ceil() as usize).clamp(4.min(n), n);
    let mut lo = 0;
    (0..n)
        .map(|i| {
            // slide the k-point window towards x[i] while that shrinks its reach
            while lo + k < n && x[lo + k] - x[i] < x[i] - x[lo] {
                lo += 1;
            }
            let window = lo..lo + k;
            let h = (x[i] - x[lo]).max(x[lo + k - 1] - x[i]) * 1.000_001;

            let (mut sw, mut swx, mut swy, mut swxx, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for j in window {
                let w = if h > 0.0 {
                    let u = (x[j] - x[i]).abs() / h;
                    (1.0 - u * u * u).powi(3)
                } else {
                    1.0
                };
                sw += w;
                swx += w * x[j];
                swy += w * y[j];
                swxx += w * x[j] * x[j];
                swxy += w * x[j] * y[j];
            }
            let mean_x = swx / sw;
            let mean_y = swy / sw;
            let sxx = swxx / sw - mean_x * mean_x;
            if sxx <= 1e-12 {
                return mean_y;
            }
            let slope = (swxy / sw - mean_x * mean_y) / sxx;
            mean_y + slope * (x[i] - mean_x)
        })
        .collect()
}

/// First derivative by central differences, one-sided at the ends.
fn derivative(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    (0..n)
        .map(|i| {
            let a = i.saturating_sub(1);
            let b = (i + 1).min(n - 1);
            (y[b] - y[a]) / (x[b] - x[a])
        })
        .collect()
}

/// Index of the point furthest above the chord from the first point to `end`, or 0 if no
/// point lies above it.
fn knee_index(x: &[f64], y: &[f64], end: usize) -> usize {
    if end == 0 {
        return 0;
    }
    let slope = (y[end] - y[0]) / (x[end] - x[0]);
    let mut best = (0, 0.0);
    for i in 1..end {
        let above = y[i] - (y[0] + slope * (x[i] - x[0]));
        if above > best.1 {
            best = (i, above);
        }
    }
    best.0
}

/// Rank all barcodes and locate the knee and inflection of their rank curve.
pub fn barcode_ranks(totals: &[u64], params: &RankParams) -> Result<BarcodeRanks, DropletError> {
    if !(params.span > 0.0 && params.span <= 1.0) {
        return Err(DropletError::invalid(format!("span {} not in (0, 1]", params.span)));
    }
    let rank = average_ranks(totals);

    let keep = |t: u64| {
        t > params.min_total
            && params
                .fit_bounds
                .map_or(true, |(lo, hi)| (t as f64) > lo && (t as f64) < hi)
    };

    // one point per distinct total, in order of increasing rank
    let mut points: Vec<(u64, f64)> = totals
        .iter()
        .zip(&rank)
        .filter(|(t, _)| keep(**t))
        .map(|(&t, &r)| (t, r))
        .collect();
    points.sort_by(|a, b| b.0.cmp(&a.0));
    points.dedup_by_key(|p| p.0);
    if points.len() < 3 {
        return Err(DropletError::invalid(format!(
            "{} distinct totals above {} are too few to fit a rank curve",
            points.len(),
            params.min_total
        )));
    }

    let x: Vec<f64> = points.iter().map(|p| p.1.log10()).collect();
    let y: Vec<f64> = points.iter().map(|p| (p.0 as f64).log10()).collect();
    let smooth = local_linear(&x, &y, params.span);
    let d1 = derivative(&x, &smooth);

    let inflection_at = d1
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i);
    let knee_at = knee_index(&x, &smooth, inflection_at);

    let fitted_by_total: std::collections::HashMap<u64, f64> =
        points.iter().zip(&smooth).map(|(p, &s)| (p.0, 10f64.powf(s))).collect();
    let fitted = totals.iter().map(|t| fitted_by_total.get(t).copied()).collect();

    Ok(BarcodeRanks {
        rank,
        total: totals.to_vec(),
        fitted,
        knee: 10f64.powf(smooth[knee_at]),
        inflection: 10f64.powf(smooth[inflection_at]),
    })
}

/// A plateau of cells, a steep drop and a power-law tail of ambient barcodes, then zeros.
#[cfg(test)]
pub(crate) fn curve() -> Vec<u64> {
    let mut totals: Vec<u64> = (0..500).map(|i| 20_000 - 30 * i).collect();
    totals.extend((0..100).map(|i| (5000.0 * (60.0f64 / 5000.0).powf(i as f64 / 99.0)) as u64));
    totals.extend((601..10_601).map(|r| (50.0 * (r as f64 / 601.0).powf(-0.5)).round() as u64));
    totals.extend(std::iter::repeat(0).take(200));
    totals
}

#[cfg(test)]
mod test {
    use super::*;

    /// 500 cells on a gently falling plateau, a sharp drop, then a long ambient tail.
    #[test]
    fn test_average_ranks() {
        let r = average_ranks(&[5, 10, 5, 1, 10, 10]);
        assert_eq!(r, vec![4.5, 2.0, 4.5, 6.0, 2.0, 2.0]);
    }

    #[test]
    fn test_knee_and_inflection() {
        let totals = curve();
        let br = barcode_ranks(&totals, &RankParams::default()).unwrap();
        assert_eq!(br.rank.len(), totals.len());
        assert!(br.knee > br.inflection);
        assert!(br.knee > 1000.0 && br.knee < 20_000.0, "knee {}", br.knee);
        assert!(br.inflection > 50.0 && br.inflection < 5000.0, "inflection {}", br.inflection);
        assert_eq!(br.suggested_lower(), br.inflection.floor() as u64);
        // zero totals are ranked but never fitted
        assert!(br.fitted[totals.len() - 1].is_none());
        assert!(br.fitted[0].is_some());
        assert_eq!(br.rank[totals.len() - 1], (totals.len() - 199 + totals.len()) as f64 / 2.0);
    }

    #[test]
    fn test_fit_bounds() {
        let totals = curve();
        let params = RankParams {
            fit_bounds: Some((20.0, 1e9)),
            ..RankParams::default()
        };
        let br = barcode_ranks(&totals, &params).unwrap();
        assert!(br.fitted[totals.len() - 201].is_none());
        assert!(br.inflection > 20.0);
    }

    #[test]
    fn test_too_few_points() {
        assert!(matches!(
            barcode_ranks(&[5, 5, 3, 0], &RankParams::default()),
            Err(DropletError::InvalidParameters { .. })
        ));
        let params = RankParams {
            span: 0.0,
            ..RankParams::default()
        };
        assert!(barcode_ranks(&curve(), &params).is_err());
    }

    #[test]
    fn test_knee_falls_back_to_top() {
        // convex curve: nothing lies above the chord
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [3.0, 1.0, 0.5, 0.0];
        assert_eq!(knee_index(&x, &y, 3), 0);
        // chord y = 3 - x: points sit 0.9 and 1.5 above it
        let y = [3.0, 2.9, 2.5, 0.0];
        assert_eq!(knee_index(&x, &y, 3), 2);
        let y = [3.0, 2.9, 1.0, 0.0];
        assert_eq!(knee_index(&x, &y, 3), 1);
    }
}
