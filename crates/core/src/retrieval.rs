//! Statistics served by the retrieval API.

/// Percent rank of a value given the number of entries strictly below it and the total count.
///
/// Returns 0 when there are fewer than two entries.
pub fn percent_rank_from_counts(fewer: u64, total: u64) -> f64 {
    if total <= 1 {
        return 0.0;
    }
    fewer as f64 / (total - 1) as f64
}

/// Mean of `ln(count + 1)` over all counts, or 0 when there are none.
pub fn mean_log_count<I>(counts: I) -> f64
where
    I: IntoIterator<Item = i64>,
{
    let (sum, n) = counts
        .into_iter()
        .fold((0.0_f64, 0_u64), |(sum, n), count| {
            (sum + ((count.max(0) as f64) + 1.0).ln(), n + 1)
        });
    if n == 0 { 0.0 } else { sum / n as f64 }
}
