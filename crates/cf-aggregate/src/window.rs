//! Sliding-window aggregation along a progression dimension.

use cf_table::{Table, stats};
use cf_types::AggMethod;
use serde::{Deserialize, Serialize};

use crate::AggregateError;

/// Window of `size` consecutive rows advancing by `size - overlap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub size: usize,
    pub overlap: usize,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            size: 1000,
            overlap: 500,
        }
    }
}

impl WindowSpec {
    pub fn new(size: usize, overlap: usize) -> Result<Self, AggregateError> {
        let spec = Self { size, overlap };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), AggregateError> {
        if self.size == 0 || self.overlap >= self.size {
            return Err(AggregateError::InvalidWindow {
                size: self.size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn step(&self) -> usize {
        self.size.saturating_sub(self.overlap).max(1)
    }

    /// Complete windows over `rows` rows; partial windows are dropped.
    #[must_use]
    pub fn window_count(&self, rows: usize) -> usize {
        if self.size == 0 || rows < self.size {
            return 0;
        }
        (rows - self.size) / self.step() + 1
    }
}

/// Stable-sorts `table` by `progression_dim` and aggregates every column of
/// each complete window with `method`. The output keeps the input's dims,
/// legends and tags; window `w` covers sorted rows
/// `w * step .. w * step + size`.
///
/// Windows are materialized in batches of at most `batch_values` values (at
/// least one window per batch). The result does not depend on the batch size.
pub fn window_aggregate(
    table: &Table,
    progression_dim: &str,
    spec: WindowSpec,
    method: AggMethod,
    batch_values: usize,
) -> Result<Table, AggregateError> {
    spec.validate()?;
    let key = table.dim_index(progression_dim)?;
    let width = table.columns();

    let mut order = (0..table.rows()).collect::<Vec<_>>();
    order.sort_by(|&left, &right| {
        table.data()[left * width + key].total_cmp(&table.data()[right * width + key])
    });
    let sorted = table.sub_table(&order)?;
    let sorted = sorted.data();

    let windows = spec.window_count(table.rows());
    if windows == 0 {
        return Ok(table.with_data(Vec::new())?);
    }
    let step = spec.step();
    let window_values = spec.size.saturating_mul(width);
    let per_batch = (batch_values / window_values.max(1)).max(1);

    let mut out = Vec::with_capacity(windows * width);
    let mut buffer = Vec::with_capacity(per_batch.min(windows).saturating_mul(window_values));
    let mut batch_start = 0;
    while batch_start < windows {
        let batch_end = (batch_start + per_batch).min(windows);
        buffer.clear();
        for window in batch_start..batch_end {
            let first = window * step;
            for column in 0..width {
                buffer.extend((first..first + spec.size).map(|row| sorted[row * width + column]));
            }
        }
        for segment in buffer.chunks_exact_mut(spec.size) {
            out.push(match method {
                AggMethod::Median => stats::median_in_place(segment),
                AggMethod::Average => stats::mean(segment),
            });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            first_window = batch_start,
            windows = batch_end - batch_start,
            total = windows,
            method = method.as_str(),
            "window batch aggregated"
        );
        batch_start = batch_end;
    }

    Ok(table.with_data(out)?)
}

#[cfg(test)]
mod tests {
    use cf_table::Table;
    use cf_types::AggMethod;

    use super::{WindowSpec, window_aggregate};
    use crate::AggregateError;

    fn shuffled_ten() -> Table {
        let t = [7.0, 2.0, 9.0, 0.0, 5.0, 3.0, 8.0, 1.0, 6.0, 4.0];
        let rows = t.iter().map(|value| vec![*value, value * 10.0]).collect();
        Table::from_rows(rows, ["t", "v"])
            .expect("table")
            .with_name("run")
    }

    #[test]
    fn ten_rows_size_four_overlap_two_gives_four_windows() {
        let spec = WindowSpec::new(4, 2).expect("spec");
        let out = window_aggregate(&shuffled_ten(), "t", spec, AggMethod::Average, 1_000)
            .expect("aggregate");
        assert_eq!(out.rows(), 4);
        assert_eq!(out.column("t").expect("t"), vec![1.5, 3.5, 5.5, 7.5]);
        assert_eq!(out.column("v").expect("v"), vec![15.0, 35.0, 55.0, 75.0]);
        assert_eq!(out.name(), Some("run"));
    }

    #[test]
    fn median_of_even_window_averages_middle_values() {
        let spec = WindowSpec::new(4, 0).expect("spec");
        let out = window_aggregate(&shuffled_ten(), "t", spec, AggMethod::Median, 1_000)
            .expect("aggregate");
        assert_eq!(out.column("t").expect("t"), vec![1.5, 5.5]);
    }

    #[test]
    fn batch_size_does_not_change_the_result() {
        let spec = WindowSpec::new(3, 1).expect("spec");
        let table = shuffled_ten();
        let whole = window_aggregate(&table, "t", spec, AggMethod::Median, usize::MAX)
            .expect("aggregate");
        for batch_values in [0, 1, 6, 7, 13] {
            let batched = window_aggregate(&table, "t", spec, AggMethod::Median, batch_values)
                .expect("aggregate");
            assert_eq!(batched, whole);
        }
    }

    #[test]
    fn short_tables_yield_no_rows() {
        let spec = WindowSpec::new(20, 5).expect("spec");
        let out = window_aggregate(&shuffled_ten(), "t", spec, AggMethod::Average, 100)
            .expect("aggregate");
        assert_eq!(out.rows(), 0);
        assert_eq!(out.dims(), &["t", "v"]);
    }

    #[test]
    fn huge_windows_over_short_tables_yield_no_rows() {
        let spec = WindowSpec::new(usize::MAX / 2, 0).expect("spec");
        for method in [AggMethod::Average, AggMethod::Median] {
            let out = window_aggregate(&shuffled_ten(), "t", spec, method, 1_000)
                .expect("aggregate");
            assert_eq!(out.rows(), 0);
        }
    }

    #[test]
    fn invalid_windows_and_methods_fail_early() {
        assert_eq!(
            WindowSpec::new(4, 4).expect_err("overlap"),
            AggregateError::InvalidWindow {
                size: 4,
                overlap: 4
            }
        );
        assert!(WindowSpec::new(0, 0).is_err());
        let err = "mode".parse::<AggMethod>().expect_err("method");
        assert_eq!(
            AggregateError::from(err).to_string(),
            "unsupported aggregation method \"mode\"; expected one of: median, average"
        );
    }
}
