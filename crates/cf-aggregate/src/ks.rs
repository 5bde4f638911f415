//! Two-sample Kolmogorov-Smirnov distances between populations.

use cf_runtime::{KeyBuilder, MemoCache, categories};
use cf_table::Table;

use crate::{AggregateError, distance_matrix, mean_table};

/// Largest gap between the empirical CDFs of `left` and `right`. NaN when
/// either sample is empty.
#[must_use]
pub fn ks_statistic(left: &[f64], right: &[f64]) -> f64 {
    if left.is_empty() || right.is_empty() {
        return f64::NAN;
    }
    let mut left = left.to_vec();
    let mut right = right.to_vec();
    left.sort_by(f64::total_cmp);
    right.sort_by(f64::total_cmp);

    let (left_len, right_len) = (left.len() as f64, right.len() as f64);
    let (mut i, mut j) = (0, 0);
    let mut largest = 0.0_f64;
    while i < left.len() && j < right.len() {
        let point = if left[i].total_cmp(&right[j]).is_le() {
            left[i]
        } else {
            right[j]
        };
        while i < left.len() && left[i].total_cmp(&point).is_le() {
            i += 1;
        }
        while j < right.len() && right[j].total_cmp(&point).is_le() {
            j += 1;
        }
        largest = largest.max((i as f64 / left_len - j as f64 / right_len).abs());
    }
    largest
}

/// Distance function comparing `dim` of two tables; values below
/// `threshold` are clamped to `0` first.
pub fn ks_distance_fn(
    dim: &str,
    threshold: Option<f64>,
) -> impl Fn(&Table, &Table) -> Result<f64, AggregateError> + '_ {
    move |left: &Table, right: &Table| {
        let clamp = |mut values: Vec<f64>| {
            if let Some(threshold) = threshold {
                for value in &mut values {
                    if *value < threshold {
                        *value = 0.0;
                    }
                }
            }
            values
        };
        Ok(ks_statistic(
            &clamp(left.column(dim)?),
            &clamp(right.column(dim)?),
        ))
    }
}

/// KS distance matrix over `dim` for every pair of `tables`.
pub fn ks_distances(
    tables: &[Table],
    dim: &str,
    threshold: Option<f64>,
) -> Result<Table, AggregateError> {
    distance_matrix(tables, ks_distance_fn(dim, threshold))
}

/// Memoized [`ks_distances`], keyed by every table's content hash, `dim` and
/// `threshold`.
pub fn ks_distances_memo(
    tables: &[Table],
    dim: &str,
    threshold: Option<f64>,
    cache: &MemoCache,
) -> Result<Table, AggregateError> {
    let key = tables
        .iter()
        .fold(
            KeyBuilder::new(categories::KS_DISTANCES).count(tables.len()),
            |key, table| key.hash(table.content_hash()),
        )
        .text(dim)
        .optional_number(threshold)
        .finish();
    cache
        .memoize(key, || ks_distances(tables, dim, threshold))
        .map(|matrix| matrix.as_ref().clone())
}

/// Combines per-dim KS matrices with a power mean of exponent `p`.
pub fn multi_dim_ks_distance<S: AsRef<str>>(
    tables: &[Table],
    dims: &[S],
    threshold: Option<f64>,
    p: f64,
    cache: &MemoCache,
) -> Result<Table, AggregateError> {
    let per_dim = dims
        .iter()
        .map(|dim| ks_distances_memo(tables, dim.as_ref(), threshold, cache))
        .collect::<Result<Vec<_>, _>>()?;
    mean_table(&per_dim, p)
}

#[cfg(test)]
mod tests {
    use cf_runtime::MemoCache;
    use cf_table::Table;

    use super::{ks_distances, ks_distances_memo, ks_statistic, multi_dim_ks_distance};

    fn population(name: &str, values: &[f64]) -> Table {
        let data = values.iter().flat_map(|value| [*value, value * 2.0]).collect();
        Table::new(data, ["CD3", "CD4"])
            .expect("table")
            .with_name(name)
    }

    #[test]
    fn ks_statistic_matches_hand_computation() {
        assert_eq!(ks_statistic(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(ks_statistic(&[1.0, 2.0], &[3.0, 4.0]), 1.0);
        assert_eq!(ks_statistic(&[1.0, 2.0, 3.0, 4.0], &[3.0, 4.0]), 0.5);
        assert!(ks_statistic(&[], &[1.0]).is_nan());
    }

    #[test]
    fn threshold_clamps_low_values() {
        let low = population("low", &[0.1, 0.2]);
        let high = population("high", &[0.3, 0.4]);
        let raw = ks_distances(&[low.clone(), high.clone()], "CD3", None).expect("ks");
        assert_eq!(raw.value("low", 1).expect("cell"), 1.0);
        let clamped = ks_distances(&[low, high], "CD3", Some(1.0)).expect("ks");
        assert_eq!(clamped.value("low", 1).expect("cell"), 0.0);
    }

    #[test]
    fn memoized_distances_are_reused_across_dims() {
        let cache = MemoCache::new();
        let tables = [
            population("a", &[1.0, 2.0, 3.0]),
            population("b", &[2.0, 3.0, 4.0]),
        ];
        let first = ks_distances_memo(&tables, "CD3", None, &cache).expect("ks");
        let combined = multi_dim_ks_distance(&tables, &["CD3", "CD4"], None, 3.0, &cache)
            .expect("combined");
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.len(), 2);
        let expected = first.value("a", 1).expect("cell");
        assert!((combined.value("a", 1).expect("cell") - expected).abs() < 1e-12);
    }
}
