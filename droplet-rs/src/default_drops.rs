use crate::error::DropletError;
use log::info;
use smart_default::SmartDefault;

/// Cell Ranger 2 style calling: cells are the barcodes whose total is at least
/// `lower_prop` times the `upper_quantile` quantile of the `expected` largest totals.
#[derive(Clone, Debug, PartialEq, SmartDefault)]
pub struct DefaultDrops {
    /// Expected number of cells
    #[default = 3000]
    pub expected: usize,
    /// Quantile of the top `expected` totals taken as a typical large cell
    #[default = 0.99]
    pub upper_quantile: f64,
    /// Fraction of that total a cell must reach
    #[default = 0.1]
    pub lower_prop: f64,
}

impl DefaultDrops {
    /// The minimum total of a called cell
    pub fn cutoff(&self, totals: &[u64]) -> Result<f64, DropletError> {
        if self.expected == 0 {
            return Err(DropletError::invalid("expected must be positive"));
        }
        for (name, v) in [("upper_quantile", self.upper_quantile), ("lower_prop", self.lower_prop)] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(DropletError::invalid(format!("{} {} not in (0, 1]", name, v)));
            }
        }
        if totals.is_empty() {
            return Err(DropletError::empty("no barcodes"));
        }

        let mut sorted = totals.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        // rank of the quantile among the top `expected`, counted from the largest
        let rank = ((self.expected as f64 * (1.0 - self.upper_quantile)).round() as usize).max(1);
        let reference = sorted[rank.min(sorted.len()) - 1];
        Ok(reference as f64 * self.lower_prop)
    }

    /// Cell calls for every barcode
    pub fn call(&self, totals: &[u64]) -> Result<Vec<bool>, DropletError> {
        let cutoff = self.cutoff(totals)?;
        let calls: Vec<bool> = totals.iter().map(|&t| t as f64 >= cutoff).collect();
        info!(
            "{} cells with total >= {:.1}",
            calls.iter().filter(|&&c| c).count(),
            cutoff
        );
        Ok(calls)
    }
}

/// Cell calls for `expected` cells with the default quantile and proportion.
pub fn default_drops(totals: &[u64], expected: usize) -> Result<Vec<bool>, DropletError> {
    DefaultDrops {
        expected,
        ..DefaultDrops::default()
    }
    .call(totals)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cutoff() {
        let totals: Vec<u64> = (1..=1000).collect();
        let dd = DefaultDrops {
            expected: 500,
            ..DefaultDrops::default()
        };
        // 5th largest total is 996
        assert!((dd.cutoff(&totals).unwrap() - 99.6).abs() < 1e-9);
        let calls = default_drops(&totals, 500).unwrap();
        assert_eq!(calls, dd.call(&totals).unwrap());
        assert_eq!(calls.iter().filter(|&&c| c).count(), 901);
        assert!(!calls[98] && calls[99]);
    }

    #[test]
    fn test_small_inputs() {
        // fewer barcodes than the quantile rank: fall back to the smallest
        let dd = DefaultDrops {
            expected: 10_000,
            ..DefaultDrops::default()
        };
        assert_eq!(dd.cutoff(&[40, 10]).unwrap(), 1.0);
        assert!(DefaultDrops {
            expected: 0,
            ..DefaultDrops::default()
        }
        .cutoff(&[1])
        .is_err());
        assert!(DefaultDrops {
            lower_prop: 0.0,
            ..DefaultDrops::default()
        }
        .cutoff(&[1])
        .is_err());
        assert!(matches!(
            DefaultDrops::default().cutoff(&[]),
            Err(DropletError::EmptyInput { .. })
        ));
    }
}
