//! Cross-table constructions: symmetric distance matrices and element-wise
//! power means.

use cf_table::{Table, TableError, unique_names};

use crate::AggregateError;

/// Square table of pairwise distances between `tables`.
///
/// Only `j < i` is evaluated; each value is mirrored to `(j, i)` and the
/// diagonal stays `0`. `distance_fn` is trusted to be symmetric. Dims are the
/// table names (`table{i}` for unnamed tables, repeats made unique).
pub fn distance_matrix<F>(tables: &[Table], mut distance_fn: F) -> Result<Table, AggregateError>
where
    F: FnMut(&Table, &Table) -> Result<f64, AggregateError>,
{
    let count = tables.len();
    #[cfg(feature = "tracing")]
    tracing::info!(pairs = count * count.saturating_sub(1) / 2, "computing distance matrix");

    let mut data = vec![0.0; count * count];
    for i in 0..count {
        for j in 0..i {
            let distance = distance_fn(&tables[i], &tables[j])?;
            data[i * count + j] = distance;
            data[j * count + i] = distance;
        }
    }

    let names = unique_names(
        tables
            .iter()
            .enumerate()
            .map(|(position, table)| table_label(table, position)),
    );
    Ok(Table::new(data, names)?)
}

fn table_label(table: &Table, position: usize) -> String {
    match table.name() {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => format!("table{position}"),
    }
}

/// Element-wise power mean `((1/n) * sum(x_i^p))^(1/p)` across same-shaped
/// tables; `p == 0` gives the geometric mean. The result carries the first
/// table's legends and tags.
pub fn mean_table(tables: &[Table], p: f64) -> Result<Table, AggregateError> {
    let first = tables
        .first()
        .ok_or(TableError::EmptyInput { op: "mean_table" })?;
    cf_table::ensure_same_dims(tables)?;
    if let Some((position, table)) = tables
        .iter()
        .enumerate()
        .find(|(_, table)| table.rows() != first.rows())
    {
        return Err(TableError::ShapeMismatch {
            position,
            name: table.name().unwrap_or("<unnamed>").to_owned(),
            expected: format!("{} rows", first.rows()),
            found: format!("{} rows", table.rows()),
        }
        .into());
    }

    let count = tables.len() as f64;
    let data = (0..first.data().len())
        .map(|cell| {
            let values = tables.iter().map(|table| table.data()[cell]);
            if p == 0.0 {
                (values.map(f64::ln).sum::<f64>() / count).exp()
            } else {
                (values.map(|value| value.powf(p)).sum::<f64>() / count).powf(1.0 / p)
            }
        })
        .collect();
    Ok(first.with_data(data)?)
}
