//! Pairwise dependence between the dimensions of one table.

use cf_runtime::{
    EngineConfig, KeyBuilder, MemoCache, NumericOracle, OracleError, OracleParams, categories,
};
use cf_table::{Table, stats};
use cf_types::Matrix;
use serde::{Deserialize, Serialize};

use crate::AggregateError;

/// Oracle routine used by [`PairwiseStatistic::Oracle`]. Called with an
/// `n x 2` point matrix; must return a `1 x 1` matrix.
pub const MUTUAL_INFORMATION_ROUTINE: &str = "mutual_information";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairwiseStatistic {
    /// Pearson correlation.
    Correlation,
    /// Histogram estimate in nats with `bins` bins per axis.
    MutualInformation { bins: usize },
    /// Delegated to [`MUTUAL_INFORMATION_ROUTINE`] on a numeric oracle.
    Oracle,
}

impl PairwiseStatistic {
    fn label(self) -> &'static str {
        match self {
            Self::Correlation => "correlation",
            Self::MutualInformation { .. } | Self::Oracle => "mutual information",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseOptions {
    /// Dims to compare; `None` means every dim of the table. Configured
    /// exclusions are removed either way.
    pub dims: Option<Vec<String>>,
    pub statistic: PairwiseStatistic,
    /// Drop rows where either value is `<= 0` before computing.
    pub drop_non_positive: bool,
    /// Minimum usable rows per pair after dropping non-positive values.
    /// Only enforced together with `drop_non_positive`.
    pub min_samples: usize,
}

impl PairwiseOptions {
    #[must_use]
    pub fn new(statistic: PairwiseStatistic, config: &EngineConfig) -> Self {
        Self {
            dims: None,
            statistic,
            drop_non_positive: true,
            min_samples: config.min_pair_samples,
        }
    }

    #[must_use]
    pub fn with_dims<S: Into<String>>(mut self, dims: impl IntoIterator<Item = S>) -> Self {
        self.dims = Some(dims.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_drop_non_positive(mut self, drop: bool) -> Self {
        self.drop_non_positive = drop;
        self
    }

    #[must_use]
    pub fn with_min_samples(mut self, samples: usize) -> Self {
        self.min_samples = samples;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseReport {
    /// Square table over the compared dims.
    pub table: Table,
    pub pairs: usize,
    /// Pairs left with fewer than `min_samples` rows after dropping
    /// non-positive values, reported as `0`.
    pub underpopulated_pairs: usize,
}

/// Builds the symmetric matrix of `options.statistic` over the selected dims.
///
/// Rows with a non-finite value in either dim are never usable. With
/// `drop_non_positive`, pairs left with fewer than `min_samples` rows are
/// reported as `0`. Only the lower triangle is computed; the diagonal is `0`.
pub fn pairwise_matrix<O: NumericOracle>(
    table: &Table,
    options: &PairwiseOptions,
    excluded_dims: &[String],
    oracle: &O,
) -> Result<PairwiseReport, AggregateError> {
    let requested = options
        .dims
        .clone()
        .unwrap_or_else(|| table.dims().to_vec());
    let dims = requested
        .into_iter()
        .filter(|dim| !excluded_dims.contains(dim))
        .collect::<Vec<_>>();
    let columns = table.get_cols(&dims)?;

    let count = dims.len();
    let pairs = count * count.saturating_sub(1) / 2;
    #[cfg(feature = "tracing")]
    tracing::info!(
        pairs,
        statistic = options.statistic.label(),
        "computing pairwise matrix"
    );

    let mut data = vec![0.0; count * count];
    let mut underpopulated_pairs = 0;
    for i in 0..count {
        for j in 0..i {
            let (left, right) = usable_pairs(
                columns.row(i).unwrap_or_default(),
                columns.row(j).unwrap_or_default(),
                options.drop_non_positive,
            );
            if options.drop_non_positive && left.len() < options.min_samples {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    left = %dims[i],
                    right = %dims[j],
                    samples = left.len(),
                    minimum = options.min_samples,
                    "too few cells for pairwise statistic"
                );
                underpopulated_pairs += 1;
                continue;
            }
            let value = match options.statistic {
                PairwiseStatistic::Correlation => stats::pearson(&left, &right),
                PairwiseStatistic::MutualInformation { bins } => {
                    mutual_information(&left, &right, bins)
                }
                PairwiseStatistic::Oracle => oracle_mutual_information(oracle, &left, &right)?,
            };
            data[i * count + j] = value;
            data[j * count + i] = value;
        }
    }

    let result = Table::new(data, dims)?
        .with_name(table.sub_name(options.statistic.label()))
        .with_origin(table);
    Ok(PairwiseReport {
        table: result,
        pairs,
        underpopulated_pairs,
    })
}

fn usable_pairs(left: &[f64], right: &[f64], drop_non_positive: bool) -> (Vec<f64>, Vec<f64>) {
    left.iter()
        .zip(right)
        .filter(|(l, r)| l.is_finite() && r.is_finite())
        .filter(|(l, r)| !drop_non_positive || (**l > 0.0 && **r > 0.0))
        .map(|(l, r)| (*l, *r))
        .unzip()
}

fn oracle_mutual_information<O: NumericOracle>(
    oracle: &O,
    left: &[f64],
    right: &[f64],
) -> Result<f64, AggregateError> {
    let points = left
        .iter()
        .zip(right)
        .flat_map(|(l, r)| [*l, *r])
        .collect::<Vec<_>>();
    let points = Matrix::new(left.len(), 2, points)?;
    let result = oracle.compute(MUTUAL_INFORMATION_ROUTINE, &points, &OracleParams::new())?;
    match (result.rows(), result.cols(), result.get(0, 0)) {
        (1, 1, Some(value)) => Ok(value),
        (rows, cols, _) => Err(OracleError::MalformedResult {
            routine: MUTUAL_INFORMATION_ROUTINE.to_owned(),
            detail: format!("expected a 1x1 result, got {rows}x{cols}"),
        }
        .into()),
    }
}

/// Plug-in mutual information estimate, in nats, from an equal-width
/// `bins x bins` joint histogram over each sample's range.
#[must_use]
pub fn mutual_information(left: &[f64], right: &[f64], bins: usize) -> f64 {
    let len = left.len().min(right.len());
    if len == 0 {
        return 0.0;
    }
    let bins = bins.max(1);
    let left_bins = bin_indices(&left[..len], bins);
    let right_bins = bin_indices(&right[..len], bins);

    let mut joint = vec![0_usize; bins * bins];
    let mut left_marginal = vec![0_usize; bins];
    let mut right_marginal = vec![0_usize; bins];
    for (&l, &r) in left_bins.iter().zip(&right_bins) {
        joint[l * bins + r] += 1;
        left_marginal[l] += 1;
        right_marginal[r] += 1;
    }

    let total = len as f64;
    let mut information = 0.0;
    for l in 0..bins {
        for r in 0..bins {
            let together = joint[l * bins + r];
            if together == 0 {
                continue;
            }
            let p_joint = together as f64 / total;
            let p_left = left_marginal[l] as f64 / total;
            let p_right = right_marginal[r] as f64 / total;
            information += p_joint * (p_joint / (p_left * p_right)).ln();
        }
    }
    information.max(0.0)
}

fn bin_indices(values: &[f64], bins: usize) -> Vec<usize> {
    let (low, high) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), value| {
            (lo.min(*value), hi.max(*value))
        });
    let width = high - low;
    values
        .iter()
        .map(|value| {
            if width <= 0.0 || !width.is_finite() {
                return 0;
            }
            let position = ((value - low) / width * bins as f64).floor();
            (position.max(0.0) as usize).min(bins - 1)
        })
        .collect()
}

/// Histogram mutual information over `dims` (or every dim) with the
/// configured exclusions, bin count and minimum sample count.
pub fn mutual_information_matrix(
    table: &Table,
    dims: Option<&[String]>,
    drop_non_positive: bool,
    config: &EngineConfig,
) -> Result<PairwiseReport, AggregateError> {
    let options = PairwiseOptions {
        dims: dims.map(<[String]>::to_vec),
        ..PairwiseOptions::new(
            PairwiseStatistic::MutualInformation {
                bins: config.mutual_information_bins,
            },
            config,
        )
    }
    .with_drop_non_positive(drop_non_positive);
    pairwise_matrix(
        table,
        &options,
        &config.pairwise_excluded_dims,
        &cf_runtime::NoOracle,
    )
}

pub fn correlation_matrix(
    table: &Table,
    dims: Option<&[String]>,
    drop_non_positive: bool,
    config: &EngineConfig,
) -> Result<PairwiseReport, AggregateError> {
    let options = PairwiseOptions {
        dims: dims.map(<[String]>::to_vec),
        ..PairwiseOptions::new(PairwiseStatistic::Correlation, config)
    }
    .with_drop_non_positive(drop_non_positive);
    pairwise_matrix(
        table,
        &options,
        &config.pairwise_excluded_dims,
        &cf_runtime::NoOracle,
    )
}

/// Memoized [`pairwise_matrix`] under the `mutual_information_tables`
/// category. The key covers the table content, every option and, for
/// [`PairwiseStatistic::Oracle`], the oracle's [`NumericOracle::identity`].
pub fn pairwise_matrix_memo<O: NumericOracle>(
    table: &Table,
    options: &PairwiseOptions,
    excluded_dims: &[String],
    oracle: &O,
    cache: &MemoCache,
) -> Result<PairwiseReport, AggregateError> {
    let mut key = KeyBuilder::new(categories::MUTUAL_INFORMATION_TABLES).hash(table.content_hash());
    key = match &options.dims {
        Some(dims) => dims
            .iter()
            .fold(key.flag(true).count(dims.len()), |key, dim| key.text(dim)),
        None => key.flag(false),
    };
    key = match options.statistic {
        PairwiseStatistic::Correlation => key.text("correlation"),
        PairwiseStatistic::MutualInformation { bins } => key.text("histogram").count(bins),
        PairwiseStatistic::Oracle => key.text("oracle").text(&oracle.identity()),
    };
    key = excluded_dims
        .iter()
        .fold(
            key.flag(options.drop_non_positive)
                .count(options.min_samples)
                .count(excluded_dims.len()),
            |key, dim| key.text(dim),
        );

    cache
        .memoize(key.finish(), || {
            pairwise_matrix(table, options, excluded_dims, oracle)
        })
        .map(|report| report.as_ref().clone())
}
