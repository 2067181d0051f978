//! Maximum likelihood estimate of the Dirichlet-multinomial concentration of the ambient
//! pool.

use crate::error::DropletError;
use droplet_stats::ln_gamma;
use log::debug;
use rayon::prelude::*;

/// Search range for the concentration
pub(crate) const MIN_ALPHA: f64 = 0.01;
pub(crate) const MAX_ALPHA: f64 = 10_000.0;
const LN_TOLERANCE: f64 = 1e-4;

/// Kept `(proportion, count)` entries of one barcode.
pub(crate) type Profile = Vec<(f64, u32)>;

/// Log-likelihood of the barcodes at concentration `alpha`, leaving out the multinomial
/// coefficient, which doesn't depend on `alpha`.
fn log_likelihood(barcodes: &[Profile], alpha: f64) -> f64 {
    let ln_gamma_alpha = ln_gamma(alpha);
    let per_barcode: Vec<f64> = barcodes
        .par_iter()
        .map(|entries| {
            let total: u64 = entries.iter().map(|&(_, y)| u64::from(y)).sum();
            if total == 0 {
                return 0.0;
            }
            let mut ll = ln_gamma_alpha - ln_gamma(total as f64 + alpha);
            for &(p, y) in entries {
                if y > 0 {
                    let ap = alpha * p;
                    ll += ln_gamma(f64::from(y) + ap) - ln_gamma(ap);
                }
            }
            ll
        })
        .collect();
    // summed in a fixed order so the estimate doesn't depend on the thread count
    per_barcode.iter().sum()
}

/// Golden-section maximisation of the likelihood over `ln(alpha)`.
pub(crate) fn estimate_alpha(barcodes: &[Profile]) -> Result<f64, DropletError> {
    let pooled: u64 = barcodes
        .iter()
        .flat_map(|b| b.iter().map(|&(_, y)| u64::from(y)))
        .sum();
    if pooled == 0 {
        return Err(DropletError::degenerate(format!(
            "{} ambient barcodes carry no counts on features with non-zero ambient proportion",
            barcodes.len()
        )));
    }

    let f = |u: f64| log_likelihood(barcodes, u.exp());
    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let (mut a, mut b) = (MIN_ALPHA.ln(), MAX_ALPHA.ln());
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let (mut fc, mut fd) = (f(c), f(d));
    while b - a > LN_TOLERANCE {
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = f(d);
        }
    }
    let alpha = ((a + b) / 2.0).exp();
    debug!("overdispersion alpha = {:.4} from {} ambient barcodes", alpha, barcodes.len());
    Ok(alpha)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Gamma};
    use rand_pcg::Pcg64Mcg;

    /// Dirichlet-multinomial draws by way of gamma-distributed proportions.
    fn draw(p: &[f64], alpha: f64, total: u32, rng: &mut Pcg64Mcg) -> Profile {
        let g: Vec<f64> = p
            .iter()
            .map(|&pi| Gamma::new(alpha * pi, 1.0).unwrap().sample(rng))
            .collect();
        let s: f64 = g.iter().sum();
        let mut counts = vec![0u32; p.len()];
        for _ in 0..total {
            let mut u = rng.random::<f64>() * s;
            let mut k = 0;
            while k + 1 < g.len() && u >= g[k] {
                u -= g[k];
                k += 1;
            }
            counts[k] += 1;
        }
        p.iter().copied().zip(counts).collect()
    }

    #[test]
    fn test_recovers_alpha() {
        let p = [0.3, 0.25, 0.2, 0.1, 0.1, 0.05];
        let mut rng = Pcg64Mcg::seed_from_u64(7);
        let barcodes: Vec<Profile> = (0..600).map(|_| draw(&p, 20.0, 60, &mut rng)).collect();
        let alpha = estimate_alpha(&barcodes).unwrap();
        assert!(alpha > 12.0 && alpha < 35.0, "alpha {}", alpha);
    }

    #[test]
    fn test_multinomial_data_hits_upper_bound() {
        let p = [0.5, 0.3, 0.2];
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        let barcodes: Vec<Profile> = (0..300).map(|_| draw(&p, 1e7, 40, &mut rng)).collect();
        let alpha = estimate_alpha(&barcodes).unwrap();
        assert!(alpha > 100.0, "alpha {}", alpha);
    }

    #[test]
    fn test_no_counts() {
        let barcodes = vec![vec![(0.5, 0), (0.5, 0)]];
        assert!(matches!(
            estimate_alpha(&barcodes),
            Err(DropletError::DegenerateAmbientModel { .. })
        ));
        assert!(matches!(estimate_alpha(&[]), Err(DropletError::DegenerateAmbientModel { .. })));
    }
}
