//! Simple Good-Turing estimation (Gale & Sampson 1995, "Good-Turing frequency estimation
//! without tears"). Used to give features that were never seen in the ambient pool a small
//! share of probability, proportional to how many features were seen exactly once.

use std::collections::BTreeMap;

/// Critical value deciding when to stop trusting the raw Turing estimates
const SWITCH_Z: f64 = 1.96;

/// Smoothed proportions for a vector of per-feature counts. Zero-count features share the
/// unseen mass `N1 / N` equally; the result sums to one. Returns `None` when every count is
/// zero.
pub fn good_turing_proportions(counts: &[u64]) -> Option<Vec<f64>> {
    let mut freq_of_freq = BTreeMap::<u64, u64>::new();
    for &c in counts.iter().filter(|&&c| c > 0) {
        *freq_of_freq.entry(c).or_insert(0) += 1;
    }
    if freq_of_freq.is_empty() {
        return None;
    }

    let r: Vec<f64> = freq_of_freq.keys().map(|&k| k as f64).collect();
    let n: Vec<f64> = freq_of_freq.values().map(|&v| v as f64).collect();
    let big_n: f64 = r.iter().zip(&n).map(|(r, n)| r * n).sum();
    let p0 = freq_of_freq.get(&1).map_or(0.0, |&n1| n1 as f64 / big_n);

    let r_star = smoothed_counts(&r, &n);
    let n_prime: f64 = r_star.iter().zip(&n).map(|(rs, n)| rs * n).sum();

    let n_unseen = counts.iter().filter(|&&c| c == 0).count();
    let seen_mass = if n_unseen == 0 { 1.0 } else { 1.0 - p0 };
    let per_count: BTreeMap<u64, f64> = freq_of_freq
        .keys()
        .zip(&r_star)
        .map(|(&k, rs)| (k, seen_mass * rs / n_prime))
        .collect();
    let unseen = if n_unseen == 0 { 0.0 } else { p0 / n_unseen as f64 };

    Some(
        counts
            .iter()
            .map(|c| if *c == 0 { unseen } else { per_count[c] })
            .collect(),
    )
}

/// Adjusted counts `r*` for each distinct count `r` with frequency `n_r`.
fn smoothed_counts(r: &[f64], n: &[f64]) -> Vec<f64> {
    let len = r.len();
    if len < 2 {
        // nothing to regress on
        return r.to_vec();
    }

    // Z_r = 2 n_r / (t - q), averaging n_r over the gap to its neighbours
    let log_r: Vec<f64> = r.iter().map(|v| v.ln()).collect();
    let log_z: Vec<f64> = (0..len)
        .map(|j| {
            let q = if j == 0 { 0.0 } else { r[j - 1] };
            let t = if j + 1 == len { 2.0 * r[j] - q } else { r[j + 1] };
            (2.0 * n[j] / (t - q)).ln()
        })
        .collect();

    let mx = log_r.iter().sum::<f64>() / len as f64;
    let my = log_z.iter().sum::<f64>() / len as f64;
    let sxy: f64 = log_r.iter().zip(&log_z).map(|(x, y)| (x - mx) * (y - my)).sum();
    let sxx: f64 = log_r.iter().map(|x| (x - mx) * (x - mx)).sum();
    let slope = sxy / sxx;

    let mut use_lgt = false;
    (0..len)
        .map(|j| {
            let rj = r[j];
            // (r + 1) S(r + 1) / S(r) with S(r) = exp(a + b ln r)
            let y = rj * (1.0 + 1.0 / rj).powf(slope + 1.0);
            let has_next = j + 1 < len && r[j + 1] == rj + 1.0;
            if use_lgt || !has_next {
                use_lgt = true;
                return y;
            }
            let ratio = n[j + 1] / n[j];
            let x = (rj + 1.0) * ratio;
            let sd = ((rj + 1.0).powi(2) * ratio / n[j] * (1.0 + ratio)).sqrt();
            if (x - y).abs() > SWITCH_Z * sd {
                x
            } else {
                use_lgt = true;
                y
            }
        })
        .collect()
}
