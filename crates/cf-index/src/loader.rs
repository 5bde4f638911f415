//! The per-file loading contract and a CSV implementation of it.

use std::path::Path;

use cf_table::{Table, TableError};
use cf_types::Legend;
use csv::ReaderBuilder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("event file has no header row")]
    MissingHeaders,
    #[error("row {row}, column {column:?}: {value:?} is not a number")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Everything a loader needs to turn one index entry into a table.
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub path: &'a Path,
    /// Tag columns to append, in index tag order.
    pub tag_names: &'a [String],
    /// Constant code of each tag for this file (`No Value` code when absent).
    pub tag_codes: &'a [f64],
    /// Legends aligned with `tag_names`.
    pub legends: &'a [Legend],
    /// When set, event values become `asinh(value * factor)`.
    pub transform_factor: Option<f64>,
}

impl<'a> LoadRequest<'a> {
    /// Request for the file alone, without tag columns or transform.
    #[must_use]
    pub fn bare(path: &'a Path) -> Self {
        Self {
            path,
            tag_names: &[],
            tag_codes: &[],
            legends: &[],
            transform_factor: None,
        }
    }
}

/// Reads per-file event tables for the index.
pub trait EventLoader {
    /// `Ok(None)` means the file holds no usable events; the index skips it
    /// without counting it as a failure.
    fn load(&self, request: &LoadRequest<'_>) -> Result<Option<Table>, LoadError>;

    /// Number of events in the file. Override when the format can count
    /// without materializing values.
    fn count(&self, path: &Path) -> Result<usize, LoadError> {
        Ok(self
            .load(&LoadRequest::bare(path))?
            .map_or(0, |table| table.rows()))
    }
}

impl<L: EventLoader + ?Sized> EventLoader for &L {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Option<Table>, LoadError> {
        (**self).load(request)
    }

    fn count(&self, path: &Path) -> Result<usize, LoadError> {
        (**self).count(path)
    }
}

/// Loads events from delimited text with a header row of dimension names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvEventLoader {
    delimiter: u8,
}

impl Default for CsvEventLoader {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvEventLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn reader(&self, path: &Path) -> Result<csv::Reader<std::fs::File>, LoadError> {
        Ok(ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .from_path(path)?)
    }
}

impl EventLoader for CsvEventLoader {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Option<Table>, LoadError> {
        let mut reader = self.reader(request.path)?;
        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Ok(None);
        }
        if headers.iter().all(str::is_empty) {
            return Err(LoadError::MissingHeaders);
        }

        let width = headers.len() + request.tag_codes.len();
        let mut data = Vec::new();
        let mut rows = 0;
        for record in reader.records() {
            let record = record?;
            rows += 1;
            for (column, field) in headers.iter().zip(record.iter()) {
                let value = field.parse::<f64>().map_err(|_| LoadError::Parse {
                    row: rows,
                    column: column.to_owned(),
                    value: field.to_owned(),
                })?;
                data.push(match request.transform_factor {
                    Some(factor) => (value * factor).asinh(),
                    None => value,
                });
            }
            data.extend_from_slice(request.tag_codes);
        }
        if rows == 0 {
            return Ok(None);
        }
        debug_assert_eq!(data.len(), rows * width);

        let dims = headers
            .iter()
            .map(str::to_owned)
            .chain(request.tag_names.iter().cloned())
            .collect::<Vec<_>>();
        let legends = std::iter::repeat_n(None, headers.len())
            .chain(
                request
                    .tag_names
                    .iter()
                    .enumerate()
                    .map(|(position, _)| request.legends.get(position).cloned()),
            )
            .collect();

        let name = request
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.path.display().to_string());
        Ok(Some(
            Table::new(data, dims)?
                .with_legends(legends)?
                .with_name(name),
        ))
    }

    /// Counts records without parsing any value.
    fn count(&self, path: &Path) -> Result<usize, LoadError> {
        let mut reader = self.reader(path)?;
        let mut record = csv::ByteRecord::new();
        let mut rows = 0;
        while reader.read_byte_record(&mut record)? {
            rows += 1;
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use cf_types::Legend;

    use super::{CsvEventLoader, EventLoader, LoadError, LoadRequest};

    #[test]
    fn csv_rows_gain_constant_tag_columns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.csv");
        fs::write(&path, "CD3, CD4\n0.0, 5\n10,20\n").expect("write");

        let tag_names = vec!["stim".to_owned()];
        let legends = vec![Legend::for_values(["a", "b"])];
        let request = LoadRequest {
            path: &path,
            tag_names: &tag_names,
            tag_codes: &[2.0],
            legends: &legends,
            transform_factor: Some(0.2),
        };
        let table = CsvEventLoader::new()
            .load(&request)
            .expect("load")
            .expect("rows");
        assert_eq!(table.dims(), &["CD3", "CD4", "stim"]);
        assert_eq!(table.column("stim").expect("stim"), vec![2.0, 2.0]);
        assert_eq!(table.value("CD4", 1).expect("cell"), 4.0_f64.asinh());
        assert_eq!(
            table.legend("stim").expect("dim").and_then(|legend| legend.label_of(2.0)),
            Some("b")
        );
        assert_eq!(table.name(), Some("events.csv"));
        assert_eq!(CsvEventLoader::new().count(&path).expect("count"), 2);
    }

    #[test]
    fn empty_files_are_not_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blank = dir.path().join("blank.csv");
        let header_only = dir.path().join("header.csv");
        fs::write(&blank, "").expect("write");
        fs::write(&header_only, "CD3,CD4\n").expect("write");
        let loader = CsvEventLoader::new();
        assert!(loader.load(&LoadRequest::bare(&blank)).expect("load").is_none());
        assert!(loader.load(&LoadRequest::bare(&header_only)).expect("load").is_none());
        assert_eq!(loader.count(&header_only).expect("count"), 0);
    }

    #[test]
    fn non_numeric_cells_name_their_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.tsv");
        fs::write(&path, "CD3\tCD4\n1\tx\n").expect("write");
        let err = CsvEventLoader::new()
            .with_delimiter(b'\t')
            .load(&LoadRequest::bare(&path))
            .expect_err("parse");
        assert!(matches!(err, LoadError::Parse { row: 1, ref column, .. } if column == "CD4"));
    }
}
