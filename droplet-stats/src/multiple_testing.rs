/// Benjamini-Hochberg adjusted p-values, returned in the input order.
///
/// `q[i] = min(1, min_{j : p[j] >= p[i]} p[j] * m / rank(p[j]))`, so the adjusted values are
/// never smaller than the raw ones and never decrease when walking the raw p-values upwards.
pub fn bh_adjust(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut adjusted = vec![0.0; m];
    let mut running_min = 1.0_f64;
    for (rank0, &i) in order.iter().enumerate().rev() {
        let scaled = p_values[i] * m as f64 / (rank0 + 1) as f64;
        running_min = running_min.min(scaled);
        // p * m / m can round one ulp below p
        adjusted[i] = running_min.max(p_values[i]);
    }
    adjusted
}

/// Benjamini-Hochberg adjustment of `(index, p-value)` pairs. Only the pairs given take part
/// in the correction, which is how untested entries are kept out of it.
pub fn adjusted_pvalue_bh(pvalue: &[(usize, f64)]) -> Vec<(usize, f64)> {
    let raw: Vec<f64> = pvalue.iter().map(|&(_, p)| p).collect();
    pvalue
        .iter()
        .zip(bh_adjust(&raw))
        .map(|(&(i, _), q)| (i, q))
        .collect()
}
