//! statistics
//!
//! ## `Statistics` trait
//!
//! Summary statistics over slices of anything convertible to `f64`. Empty input gives `NaN`
//! rather than a panic so callers can decide how to report it.

use num_traits::ToPrimitive;

/// Scale factor turning a median absolute deviation into a consistent estimate of the
/// standard deviation for normal data.
pub const MAD_SCALE: f64 = 1.4826;

/// Statistics Trait
pub trait Statistics {
    /// Arithmetic mean
    fn mean(&self) -> f64;
    /// Population variance (`ddof = 0`) or sample variance (`ddof = 1`)
    fn var(&self, ddof: f64) -> f64;
    /// Quantile with linear interpolation between order statistics (R's type 7)
    fn quantile(&self, prob: f64) -> f64;
    /// median
    fn median(&self) -> f64;
    /// Median absolute deviation from the median, scaled by [`MAD_SCALE`]
    fn mad(&self) -> f64;
}

fn to_sorted_f64<T: ToPrimitive>(xs: &[T]) -> Vec<f64> {
    let mut v: Vec<f64> = xs.iter().map(|x| x.to_f64().unwrap_or(f64::NAN)).collect();
    v.sort_by(f64::total_cmp);
    v
}

fn quantile_of_sorted(sorted: &[f64], prob: f64) -> f64 {
    if sorted.is_empty() || !(0.0..=1.0).contains(&prob) {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * prob;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

impl<T: ToPrimitive> Statistics for [T] {
    fn mean(&self) -> f64 {
        if self.is_empty() {
            return f64::NAN;
        }
        self.iter().map(|x| x.to_f64().unwrap_or(f64::NAN)).sum::<f64>() / self.len() as f64
    }

    fn var(&self, ddof: f64) -> f64 {
        let n = self.len() as f64;
        if n <= ddof {
            return f64::NAN;
        }
        let mean = self.mean();
        let ss: f64 = self
            .iter()
            .map(|x| {
                let d = x.to_f64().unwrap_or(f64::NAN) - mean;
                d * d
            })
            .sum();
        ss / (n - ddof)
    }

    fn quantile(&self, prob: f64) -> f64 {
        quantile_of_sorted(&to_sorted_f64(self), prob)
    }

    fn median(&self) -> f64 {
        self.quantile(0.5)
    }

    fn mad(&self) -> f64 {
        let med = self.median();
        let dev: Vec<f64> = self
            .iter()
            .map(|x| (x.to_f64().unwrap_or(f64::NAN) - med).abs())
            .collect();
        MAD_SCALE * dev.median()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_stats() {
        let v = vec![1, 2, 4, 3, 5, 6];
        assert_approx_eq!(v.mean(), 3.5, 1e-12);
        assert_approx_eq!(v.var(0.0), 2.916_666_666_666_666_5, 1e-12);
        assert_approx_eq!(v.var(1.0), 3.5, 1e-12);
        assert_approx_eq!(v.median(), 3.5, 1e-12);
        // R: quantile(1:6, 0.99) == 5.95
        assert_approx_eq!(v.quantile(0.99), 5.95, 1e-12);
        assert_approx_eq!(v.quantile(0.0), 1.0, 1e-12);
        assert_approx_eq!(v.quantile(1.0), 6.0, 1e-12);
        // deviations from 3.5: 2.5 1.5 0.5 0.5 1.5 2.5 -> median 1.5
        assert_approx_eq!(v.mad(), 1.5 * MAD_SCALE, 1e-12);

        let odd = [3.0f64, -1.0, 10.0];
        assert_approx_eq!(odd.median(), 3.0, 1e-12);
        assert_approx_eq!(odd.mad(), 4.0 * MAD_SCALE, 1e-12);
    }

    #[test]
    fn test_empty() {
        let v: Vec<u32> = vec![];
        assert!(v.mean().is_nan());
        assert!(v.median().is_nan());
        assert!(v.mad().is_nan());
        assert!([1.0f64].var(1.0).is_nan());
    }
}
