#![forbid(unsafe_code)]

use cf_table::{Table, TableError, stats};
use cf_types::{DimRange, Legend};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GateError {
    #[error("invalid bins: {reason}")]
    InvalidBins { reason: String },
    #[error("discretize got {names} new dim names for {dims} dims")]
    NameCount { dims: usize, names: usize },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Rows where every range holds (`min <= value <= max`). Input row order is
/// kept and tags are copied.
pub fn gate(table: &Table, ranges: &[DimRange]) -> Result<Table, GateError> {
    let positions = range_positions(table, ranges)?;
    let mask = table
        .iter_rows()
        .map(|row| {
            positions
                .iter()
                .zip(ranges)
                .all(|(&position, range)| range.contains(row[position]))
        })
        .collect::<Vec<_>>();
    Ok(table.filter_rows(&mask)?)
}

/// Rows violating at least one range (`value < min || value > max`).
///
/// This is an OR of violations, not the negation of [`gate`]'s AND: with one
/// range the two outputs partition the table, with more ranges a row outside
/// the conjunction is selected only if it fails some single range, and rows
/// with NaN in a gated dim appear in neither. Callers wanting a true
/// complement of a multi-range gate should combine single-range gates.
pub fn gate_out(table: &Table, ranges: &[DimRange]) -> Result<Table, GateError> {
    let positions = range_positions(table, ranges)?;
    let mask = table
        .iter_rows()
        .map(|row| {
            positions
                .iter()
                .zip(ranges)
                .any(|(&position, range)| range.violated_by(row[position]))
        })
        .collect::<Vec<_>>();
    Ok(table.filter_rows(&mask)?)
}

fn range_positions(table: &Table, ranges: &[DimRange]) -> Result<Vec<usize>, TableError> {
    let dims = ranges.iter().map(|range| range.dim.as_str()).collect::<Vec<_>>();
    table.dim_indices(&dims)
}

/// Drops rows with a negative (or NaN) value in any of `dims`.
pub fn remove_bad_cells<S: AsRef<str>>(table: &Table, dims: &[S]) -> Result<Table, GateError> {
    let ranges = dims
        .iter()
        .map(|dim| DimRange::new(dim.as_ref(), 0.0, f64::INFINITY))
        .collect::<Vec<_>>();
    gate(table, &ranges)
}

/// How to cut a dimension into intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bins {
    /// `n` equal-width intervals over the observed `[min, max]`.
    Count(usize),
    /// Explicit, strictly ascending edges.
    Edges(Vec<f64>),
}

impl Bins {
    /// Resolves to at least two ascending edges for `dim` of `table`.
    pub fn edges(&self, table: &Table, dim: &str) -> Result<Vec<f64>, GateError> {
        match self {
            Self::Count(0) => Err(GateError::InvalidBins {
                reason: "bin count must be at least 1".to_owned(),
            }),
            Self::Count(count) => {
                let low = table.min(dim)?;
                let high = table.max(dim)?;
                Ok(stats::linspace(low, high, count + 1))
            }
            Self::Edges(edges) => {
                if edges.len() < 2 {
                    return Err(GateError::InvalidBins {
                        reason: format!("need at least 2 edges, got {}", edges.len()),
                    });
                }
                if edges.iter().any(|edge| edge.is_nan())
                    || edges.windows(2).any(|pair| pair[0] >= pair[1])
                {
                    return Err(GateError::InvalidBins {
                        reason: format!("edges must be strictly ascending: {edges:?}"),
                    });
                }
                Ok(edges.clone())
            }
        }
    }
}

/// Interval of `value` among `edges`: `Some(i)` for `[edges[i], edges[i+1])`,
/// with the last interval closed on the right. `None` outside the edges.
fn interval_of(value: f64, edges: &[f64]) -> Option<usize> {
    let last = edges.len().checked_sub(1)?;
    if value.is_nan() || value < edges[0] || value > edges[last] {
        return None;
    }
    if value == edges[last] {
        return last.checked_sub(1);
    }
    // Number of edges <= value, minus one.
    let upper = edges.partition_point(|edge| *edge <= value);
    upper.checked_sub(1).map(|slot| slot.min(last - 1))
}

/// Partitions rows by value ranges of `dim`, one table per interval. Table
/// `i` holds rows with `edges[i] <= value < edges[i+1]`; the last interval is
/// closed. Rows outside the edges are dropped. Each table is named
/// `"<name> <lo><=dim<<hi>"` with two-decimal bounds.
pub fn split(table: &Table, dim: &str, bins: &Bins) -> Result<Vec<Table>, GateError> {
    let edges = bins.edges(table, dim)?;
    let position = table.dim_index(dim)?;
    let intervals = edges.len() - 1;

    let slots = table
        .iter_rows()
        .map(|row| interval_of(row[position], &edges))
        .collect::<Vec<_>>();

    (0..intervals)
        .map(|interval| {
            let mask = slots
                .iter()
                .map(|slot| *slot == Some(interval))
                .collect::<Vec<_>>();
            let name = table.sub_name(&format!(
                "{:.2}<={dim}<{:.2}",
                edges[interval],
                edges[interval + 1]
            ));
            Ok(table.filter_rows(&mask)?.with_name(name))
        })
        .collect()
}

/// Replaces each value of `dims` by the median of its bin, truncated to two
/// decimals, and attaches a legend labelling every code with its interval
/// (`"lo <= val < hi"`). Values below the first edge or above the last form
/// their own open-ended bins bounded by the column's min and max.
///
/// With `new_dim_names`, the discretized columns are appended under those
/// names and the source columns are kept.
pub fn discretize<S: AsRef<str>>(
    table: &Table,
    dims: &[S],
    bins: &Bins,
    new_dim_names: Option<&[String]>,
) -> Result<Table, GateError> {
    if let Some(names) = new_dim_names {
        if names.len() != dims.len() {
            return Err(GateError::NameCount {
                dims: dims.len(),
                names: names.len(),
            });
        }
    }

    let mut data = table.data().to_vec();
    let mut legends = table.legends().to_vec();
    let mut appended = Vec::new();

    for dim in dims {
        let dim = dim.as_ref();
        let (values, legend) = discretize_column(table, dim, bins)?;
        if new_dim_names.is_some() {
            appended.push((values, legend));
        } else {
            let position = table.dim_index(dim)?;
            let width = table.columns();
            for (row, value) in values.into_iter().enumerate() {
                data[row * width + position] = value;
            }
            legends[position] = Some(legend);
        }
    }

    let rewritten = table.with_data(data)?.with_legends(legends)?;
    let Some(names) = new_dim_names else {
        return Ok(rewritten);
    };

    let columns = appended.len();
    let mut extra = Vec::with_capacity(table.rows() * columns);
    for row in 0..table.rows() {
        extra.extend(appended.iter().map(|(values, _)| values[row]));
    }
    let matrix = cf_types::Matrix::new(table.rows(), columns, extra).map_err(TableError::from)?;
    let extra_legends = appended.into_iter().map(|(_, legend)| Some(legend)).collect();
    Ok(rewritten.append_dims(names, &matrix, Some(extra_legends))?)
}

fn discretize_column(table: &Table, dim: &str, bins: &Bins) -> Result<(Vec<f64>, Legend), GateError> {
    let column = table.column(dim)?;
    let edges = bins.edges(table, dim)?;
    let low = table.min(dim)?;
    let high = table.max(dim)?;
    let last = edges.len() - 1;

    // Slot 0 is below the edges, slot `edges.len()` above them. NaN stays
    // unassigned.
    let slot_of = |value: f64| -> usize {
        if value.is_nan() {
            usize::MAX
        } else if value < edges[0] {
            0
        } else if value > edges[last] {
            edges.len()
        } else {
            interval_of(value, &edges).map_or(0, |interval| interval + 1)
        }
    };
    let slots = column.iter().map(|value| slot_of(*value)).collect::<Vec<_>>();

    let mut values = vec![f64::NAN; column.len()];
    let mut legend = Legend::new();
    for slot in 0..=edges.len() {
        let members = column
            .iter()
            .zip(&slots)
            .filter(|(_, candidate)| **candidate == slot)
            .map(|(value, _)| *value)
            .collect::<Vec<_>>();
        if members.is_empty() {
            continue;
        }
        let code = (stats::median(&members) * 100.0).trunc() / 100.0;
        for (value, candidate) in values.iter_mut().zip(&slots) {
            if *candidate == slot {
                *value = code;
            }
        }
        let (lo, hi) = match slot {
            0 => (low, edges[0]),
            slot if slot == edges.len() => (edges[last], high),
            slot => (edges[slot - 1], edges[slot]),
        };
        legend = legend.with_entry(code, format!("{lo:.6} <= {code:.6} < {hi:.6}"));
    }
    Ok((values, legend))
}
