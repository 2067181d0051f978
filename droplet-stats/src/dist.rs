use statrs::function::gamma::ln_gamma;

/// Log(PMF) of a count vector under a multinomial.
/// Args:
///  entries - `(probability, count)` for every feature with a non-zero count; features with
///            zero counts contribute nothing and may be left out.
/// Returns:
///  The log-probability, `-inf` if a feature with zero probability was observed.
pub fn multinomial_log_pmf<I>(entries: I) -> f64
where
    I: IntoIterator<Item = (f64, u32)>,
{
    let mut total = 0.0;
    let mut acc = 0.0;
    for (p, y) in entries {
        if y == 0 {
            continue;
        }
        if p <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let y = y as f64;
        total += y;
        acc += y * p.ln() - ln_gamma(y + 1.0);
    }
    acc + ln_gamma(total + 1.0)
}

/// Log(PMF) of a count vector under a Dirichlet-multinomial whose Dirichlet has mean `p` and
/// concentration `alpha`, i.e. parameters `alpha * p_g`. An infinite `alpha` is the
/// multinomial limit.
pub fn dirichlet_multinomial_log_pmf<I>(entries: I, alpha: f64) -> f64
where
    I: IntoIterator<Item = (f64, u32)>,
{
    if alpha.is_infinite() {
        return multinomial_log_pmf(entries);
    }
    let mut total = 0.0;
    let mut acc = 0.0;
    for (p, y) in entries {
        if y == 0 {
            continue;
        }
        if p <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let y = y as f64;
        let ap = alpha * p;
        total += y;
        acc += ln_gamma(y + ap) - ln_gamma(ap) - ln_gamma(y + 1.0);
    }
    acc + ln_gamma(total + 1.0) + ln_gamma(alpha) - ln_gamma(total + alpha)
}
