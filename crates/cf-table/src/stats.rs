//! One-dimensional statistics over table columns, plus the numeric kernels
//! shared with the aggregation crate.

use cf_runtime::{EngineConfig, KeyBuilder, MemoCache, categories};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;

use crate::{Table, TableError};

/// Arithmetic mean; NaN for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median with the mean of the two middle values for even lengths; NaN for
/// an empty slice. Reorders `values`.
#[must_use]
pub fn median_in_place(values: &mut [f64]) -> f64 {
    let len = values.len();
    if len == 0 {
        return f64::NAN;
    }
    let mid = len / 2;
    let (_, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if len % 2 == 1 {
        return upper;
    }
    let lower = values[..mid]
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    (lower + upper) / 2.0
}

#[must_use]
pub fn median(values: &[f64]) -> f64 {
    median_in_place(&mut values.to_vec())
}

/// Population standard deviation.
#[must_use]
pub fn std_dev(values: &[f64]) -> f64 {
    let center = mean(values);
    let variance = values
        .iter()
        .map(|value| (value - center).powi(2))
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

/// Pearson correlation; NaN when either side has zero variance.
#[must_use]
pub fn pearson(left: &[f64], right: &[f64]) -> f64 {
    let len = left.len().min(right.len());
    if len == 0 {
        return f64::NAN;
    }
    let (left, right) = (&left[..len], &right[..len]);
    let (left_mean, right_mean) = (mean(left), mean(right));
    let mut covariance = 0.0;
    let mut left_var = 0.0;
    let mut right_var = 0.0;
    for (l, r) in left.iter().zip(right) {
        let (dl, dr) = (l - left_mean, r - right_mean);
        covariance += dl * dr;
        left_var += dl * dl;
        right_var += dr * dr;
    }
    covariance / (left_var * right_var).sqrt()
}

/// Error function, Abramowitz & Stegun 7.1.26 (|error| < 1.5e-7).
#[must_use]
pub fn erf(x: f64) -> f64 {
    const P: f64 = 0.327_591_1;
    const A: [f64; 5] = [
        0.254_829_592,
        -0.284_496_736,
        1.421_413_741,
        -1.453_152_027,
        1.061_405_429,
    ];
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = A.iter().rev().fold(0.0, |acc, coeff| acc * t + coeff) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Normal CDF; a step at `mean` when `std` is zero.
#[must_use]
pub fn normal_cdf(x: f64, mean: f64, std: f64) -> f64 {
    if std <= 0.0 {
        return if x < mean { 0.0 } else { 1.0 };
    }
    0.5 * (1.0 + erf((x - mean) / (std * std::f64::consts::SQRT_2)))
}

/// Equal-width histogram over `[min, max]` of `values` with `bins` bins; the
/// last bin is closed. A constant sample spans `[v - 0.5, v + 0.5]`.
/// Returns the counts and the `bins + 1` edges.
#[must_use]
pub fn histogram(values: &[f64], bins: usize) -> (Vec<usize>, Vec<f64>) {
    let bins = bins.max(1);
    let (mut low, mut high) = values
        .iter()
        .copied()
        .filter(|value| value.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), value| {
            (lo.min(value), hi.max(value))
        });
    if !low.is_finite() {
        (low, high) = (0.0, 1.0);
    } else if low == high {
        (low, high) = (low - 0.5, high + 0.5);
    }

    let edges = linspace(low, high, bins + 1);
    let mut counts = vec![0_usize; bins];
    for value in values.iter().filter(|value| value.is_finite()) {
        counts[bin_of(*value, low, high, bins)] += 1;
    }
    (counts, edges)
}

fn bin_of(value: f64, low: f64, high: f64, bins: usize) -> usize {
    let position = ((value - low) / (high - low) * bins as f64).floor();
    (position.max(0.0) as usize).min(bins - 1)
}

/// `count` evenly spaced points from `start` to `end`, both included.
#[must_use]
pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count)
                .map(|i| {
                    if i == count - 1 {
                        end
                    } else {
                        start + step * i as f64
                    }
                })
                .collect()
        }
    }
}

/// Dimension names of the rows produced by [`Table::stats`].
pub const STAT_NAMES: [&str; 7] = [
    "num_cells",
    "min",
    "max",
    "average",
    "std",
    "median",
    "gaussian_fit",
];

impl Table {
    /// Column means of `dims`, in the requested order.
    pub fn average<S: AsRef<str>>(&self, dims: &[S]) -> Result<Vec<f64>, TableError> {
        let cols = self.get_cols(dims)?;
        Ok(cols.iter_rows().map(mean).collect())
    }

    pub fn std(&self, dim: &str) -> Result<f64, TableError> {
        Ok(std_dev(&self.column(dim)?))
    }

    pub fn median(&self, dim: &str) -> Result<f64, TableError> {
        Ok(median_in_place(&mut self.column(dim)?))
    }

    pub fn correlation(&self, left: &str, right: &str) -> Result<f64, TableError> {
        Ok(pearson(&self.column(left)?, &self.column(right)?))
    }

    /// L1 distance between the normalized histogram of `dim` and the bin
    /// masses of a normal distribution. `mean` and `std` default to the
    /// sample's own.
    pub fn gaussian_fit(
        &self,
        dim: &str,
        bins: usize,
        mean_hint: Option<f64>,
        std_hint: Option<f64>,
    ) -> Result<f64, TableError> {
        let values = self.column(dim)?;
        if values.is_empty() {
            return Err(TableError::EmptyTable { op: "gaussian_fit" });
        }
        let center = mean_hint.unwrap_or_else(|| mean(&values));
        let spread = std_hint.unwrap_or_else(|| std_dev(&values));

        let (counts, edges) = histogram(&values, bins);
        let total = counts.iter().sum::<usize>().max(1) as f64;
        Ok(counts
            .iter()
            .zip(edges.windows(2))
            .map(|(count, edge)| {
                let expected =
                    normal_cdf(edge[1], center, spread) - normal_cdf(edge[0], center, spread);
                (expected - *count as f64 / total).abs()
            })
            .sum())
    }

    /// One-row table of summary statistics for `dim`, dims prefixed by
    /// `prefix`. The gaussian fit uses `config.gaussian_fit_bins` bins.
    pub fn stats(
        &self,
        dim: &str,
        prefix: &str,
        config: &EngineConfig,
    ) -> Result<Self, TableError> {
        let values = self.column(dim)?;
        if values.is_empty() {
            return Err(TableError::EmptyTable { op: "stats" });
        }
        let average = mean(&values);
        let std = std_dev(&values);
        let row = vec![
            self.rows as f64,
            self.min(dim)?,
            self.max(dim)?,
            average,
            std,
            median(&values),
            self.gaussian_fit(dim, config.gaussian_fit_bins, Some(average), Some(std))?,
        ];
        Ok(
            Table::new(row, STAT_NAMES.iter().map(|stat| format!("{prefix}{stat}")))?
                .with_name(self.sub_name(&format!("stats for {dim}")))
                .with_origin(self),
        )
    }

    /// [`Table::stats`] for each dim side by side, each prefixed `<dim>_`.
    pub fn stats_multi_dim<S: AsRef<str>>(
        &self,
        dims: &[S],
        config: &EngineConfig,
    ) -> Result<Self, TableError> {
        self.dim_indices(dims)?;
        let mut names = Vec::new();
        let mut row = Vec::new();
        for dim in dims {
            let dim = dim.as_ref();
            let single = self.stats(dim, &format!("{dim}_"), config)?;
            names.extend(single.dims().iter().cloned());
            row.extend_from_slice(single.data());
        }
        Ok(Table::new(row, names)?
            .with_name(self.sub_name("stats"))
            .with_origin(self))
    }

    /// `n` distinct rows chosen by a generator seeded with `seed`, kept in
    /// their original order.
    pub fn random_sample(&self, n: usize, seed: u64) -> Result<Self, TableError> {
        if n > self.rows {
            return Err(TableError::SampleTooLarge {
                requested: n,
                rows: self.rows,
            });
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut picked = index::sample(&mut rng, self.rows, n).into_vec();
        picked.sort_unstable();
        self.sub_table(&picked)
    }

    /// Memoized [`Table::random_sample`]: repeated calls return the same
    /// sample for the same content, size and seed.
    pub fn random_sample_memo(
        &self,
        n: usize,
        seed: u64,
        cache: &MemoCache,
    ) -> Result<Self, TableError> {
        let key = KeyBuilder::new(categories::RANDOM_SAMPLES)
            .hash(self.content_hash())
            .count(n)
            .unsigned(seed)
            .finish();
        cache
            .memoize(key, || self.random_sample(n, seed))
            .map(|sample| sample.as_ref().clone())
    }
}

#[cfg(test)]
mod tests {
    use cf_runtime::{EngineConfig, MemoCache};
    use cf_types::ORIGIN_TAG;

    use super::{erf, histogram, linspace, median, normal_cdf, pearson, std_dev};
    use crate::{Table, TableError};

    fn close(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-6
    }

    #[test]
    fn median_matches_numpy_for_even_lengths() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[5.0, 1.0, 3.0]), 3.0);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn kernels_match_reference_values() {
        assert!(close(std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.0));
        assert!(close(pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]), 1.0));
        assert!(close(erf(1.0), 0.842_700_79));
        assert!(close(normal_cdf(0.0, 0.0, 1.0), 0.5));
        assert_eq!(normal_cdf(1.0, 1.0, 0.0), 1.0);
    }

    #[test]
    fn histogram_closes_the_last_bin() {
        let (counts, edges) = histogram(&[0.0, 1.0, 2.0, 3.0, 4.0], 4);
        assert_eq!(counts, vec![1, 1, 1, 2]);
        assert_eq!(edges, linspace(0.0, 4.0, 5));
    }

    #[test]
    fn stats_row_names_and_origin() {
        let table = Table::new(vec![1.0, 2.0, 3.0, 4.0], ["CD3"])
            .expect("table")
            .with_name("pop");
        let config = EngineConfig::default();
        let stats = table.stats("CD3", "", &config).expect("stats");
        assert_eq!(stats.rows(), 1);
        assert_eq!(stats.value("num_cells", 0).expect("n"), 4.0);
        assert_eq!(stats.value("median", 0).expect("median"), 2.5);
        assert_eq!(stats.name(), Some("pop stats for CD3"));
        assert_eq!(stats.tag(ORIGIN_TAG), Some(table.content_hash().as_str()));

        let multi = table.stats_multi_dim(&["CD3"], &config).expect("multi");
        assert_eq!(multi.dims()[0], "CD3_num_cells");
    }

    #[test]
    fn stats_fit_uses_configured_bin_count() {
        let table = Table::new(vec![0.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 9.0], ["CD3"])
            .expect("table");
        let mean = table.average(&["CD3"]).expect("mean")[0];
        let std = table.std("CD3").expect("std");
        for bins in [2, 5, 40] {
            let config = EngineConfig::default().with_gaussian_fit_bins(bins);
            let fit = table
                .stats("CD3", "", &config)
                .expect("stats")
                .value("gaussian_fit", 0)
                .expect("fit");
            let direct = table
                .gaussian_fit("CD3", bins, Some(mean), Some(std))
                .expect("fit");
            assert_eq!(fit, direct);
        }
    }

    #[test]
    fn random_sample_is_reproducible_and_ordered() {
        let table = Table::new((0..50).map(f64::from).collect(), ["x"]).expect("table");
        let cache = MemoCache::new();
        let first = table.random_sample_memo(10, 7, &cache).expect("sample");
        let again = table.random_sample(10, 7).expect("sample");
        assert_eq!(first, again);
        let xs = first.column("x").expect("x");
        assert!(xs.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(matches!(
            table.random_sample(51, 7),
            Err(TableError::SampleTooLarge { .. })
        ));
    }
}
