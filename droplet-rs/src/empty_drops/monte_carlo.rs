//! Null distribution of the Dirichlet-multinomial log-probability, by simulation.
//!
//! Each iteration grows one count vector from the ambient model with a Polya urn and
//! records its log-probability whenever it passes the total of a group of candidates.
//! Recording is a binary search into that group's sorted observed values, so one iteration
//! serves every candidate at once.

use crate::rng::stream_rng;
use rand::Rng;
use rand_pcg::Pcg64Mcg;
use rayon::prelude::*;

/// Simulated values within this relative distance of an observed value count as ties.
const TIE_TOLERANCE: f64 = 1e-9;

/// Ambient model restricted to features with positive proportion.
pub(crate) struct NullModel {
    prop: Vec<f64>,
    ln_prop: Vec<f64>,
    cumulative: Vec<f64>,
    alpha: f64,
}

impl NullModel {
    /// `prop` must be positive and sum to one; an infinite `alpha` is the multinomial.
    pub(crate) fn new(prop: Vec<f64>, alpha: f64) -> NullModel {
        let mut acc = 0.0;
        let cumulative = prop
            .iter()
            .map(|p| {
                acc += p;
                acc
            })
            .collect();
        NullModel {
            ln_prop: prop.iter().map(|p| p.ln()).collect(),
            prop,
            cumulative,
            alpha,
        }
    }

    fn draw_fresh(&self, rng: &mut Pcg64Mcg) -> usize {
        let u = rng.random::<f64>() * self.cumulative[self.cumulative.len() - 1];
        self.cumulative
            .partition_point(|&c| c <= u)
            .min(self.prop.len() - 1)
    }
}

/// Candidates grouped by total, observed values sorted ascending within each group.
pub(crate) struct TotalGroups {
    totals: Vec<u64>,
    offsets: Vec<usize>,
    observed: Vec<f64>,
    members: Vec<usize>,
}

impl TotalGroups {
    pub(crate) fn new(totals: &[u64], observed: &[f64]) -> TotalGroups {
        let mut members: Vec<usize> = (0..totals.len()).collect();
        members.sort_by(|&a, &b| {
            totals[a]
                .cmp(&totals[b])
                .then(observed[a].total_cmp(&observed[b]))
        });
        let mut group_totals = Vec::new();
        let mut offsets = Vec::new();
        for (pos, &i) in members.iter().enumerate() {
            if group_totals.last() != Some(&totals[i]) {
                group_totals.push(totals[i]);
                offsets.push(pos);
            }
        }
        offsets.push(members.len());
        TotalGroups {
            totals: group_totals,
            offsets,
            observed: members.iter().map(|&i| observed[i]).collect(),
            members,
        }
    }

    fn range(&self, group: usize) -> std::ops::Range<usize> {
        self.offsets[group]..self.offsets[group + 1]
    }

    /// Each group gets one extra slot for simulated values above all of its observations.
    fn width(&self) -> usize {
        self.members.len() + self.totals.len()
    }
}

/// Scratch state of one worker.
struct Urn<'a> {
    model: &'a NullModel,
    counts: Vec<u32>,
    drawn: Vec<u32>,
}

impl<'a> Urn<'a> {
    fn new(model: &'a NullModel) -> Urn<'a> {
        Urn {
            model,
            counts: vec![0; model.prop.len()],
            drawn: Vec::new(),
        }
    }

    /// Add one count and return the change in log-probability.
    fn step(&mut self, rng: &mut Pcg64Mcg) -> f64 {
        let k = self.drawn.len();
        let kf = k as f64;
        let alpha = self.model.alpha;
        let g = if alpha.is_infinite() || rng.random::<f64>() * (alpha + kf) < alpha {
            self.model.draw_fresh(rng)
        } else {
            self.drawn[rng.random_range(0..k)] as usize
        };
        let n_g = f64::from(self.counts[g]);
        let delta = if alpha.is_infinite() {
            (kf + 1.0).ln() - (n_g + 1.0).ln() + self.model.ln_prop[g]
        } else {
            (kf + 1.0).ln() - (n_g + 1.0).ln() + (n_g + alpha * self.model.prop[g]).ln()
                - (kf + alpha).ln()
        };
        self.counts[g] += 1;
        self.drawn.push(g as u32);
        delta
    }

    fn simulate(&mut self, rng: &mut Pcg64Mcg, groups: &TotalGroups, hits: &mut [u64]) {
        for &g in &self.drawn {
            self.counts[g as usize] = 0;
        }
        self.drawn.clear();

        let mut log_p = 0.0;
        for (gi, &total) in groups.totals.iter().enumerate() {
            while (self.drawn.len() as u64) < total {
                log_p += self.step(rng);
            }
            let range = groups.range(gi);
            let cut = log_p - TIE_TOLERANCE * f64::abs(log_p).max(1.0);
            let pos = groups.observed[range.clone()].partition_point(|&o| o < cut);
            hits[range.start + gi + pos] += 1;
        }
    }
}

/// For every candidate, the number of simulated log-probabilities at its total that are no
/// larger than its observed one. Iteration `i` draws from `stream_rng(seed, i)`, so the
/// counts don't depend on the thread pool.
pub(crate) fn count_at_most(model: &NullModel, groups: &TotalGroups, n_iter: usize, seed: u64) -> Vec<u64> {
    let width = groups.width();
    let hits = (0..n_iter)
        .into_par_iter()
        .with_min_len(16)
        .fold(
            || (Urn::new(model), vec![0u64; width]),
            |(mut urn, mut hits), i| {
                let mut rng = stream_rng(seed, i as u64);
                urn.simulate(&mut rng, groups, &mut hits);
                (urn, hits)
            },
        )
        .map(|(_, hits)| hits)
        .reduce(
            || vec![0u64; width],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                a
            },
        );

    let mut out = vec![0u64; groups.members.len()];
    for gi in 0..groups.totals.len() {
        let mut acc = 0;
        for j in groups.range(gi) {
            acc += hits[j + gi];
            out[groups.members[j]] = acc;
        }
    }
    out
}
