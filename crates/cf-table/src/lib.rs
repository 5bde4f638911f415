#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

use cf_runtime::{ContentHash, ContentHasher, KeyBuilder, MemoCache, categories};
use cf_types::{Legend, Matrix, NAME_TAG, ORIGIN_TAG, TagSet, TypeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod stats;
pub mod transform;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("some dims were not found; dims not found: {missing:?}; dims in table: {available:?}")]
    UnknownDimension {
        missing: Vec<String>,
        available: Vec<String>,
    },
    #[error("duplicate dimension name {0:?}")]
    DuplicateDimension(String),
    #[error("table data has {values} values, which does not fill {columns} columns")]
    DataShape { values: usize, columns: usize },
    #[error("legend list has {legends} entries but the table has {dims} dimensions")]
    LegendCount { legends: usize, dims: usize },
    #[error("table {position} ({name}) does not match the first table: expected {expected}, found {found}")]
    ShapeMismatch {
        position: usize,
        name: String,
        expected: String,
        found: String,
    },
    #[error("row {row} is out of bounds for a table with {rows} rows")]
    RowOutOfBounds { row: usize, rows: usize },
    #[error("row mask has {mask} entries but the table has {rows} rows")]
    MaskLength { mask: usize, rows: usize },
    #[error("{op} requires a table with at least one row")]
    EmptyTable { op: &'static str },
    #[error("{op} of {dim:?} found only NaN values")]
    AllNaN { op: &'static str, dim: String },
    #[error("{op} requires at least one table")]
    EmptyInput { op: &'static str },
    #[error("cannot sample {requested} rows from a table with {rows} rows")]
    SampleTooLarge { requested: usize, rows: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Immutable numeric table: `rows x dims` values stored row-major, one
/// optional legend per dimension and a set of provenance tags.
///
/// Every operation returns a new table. The `with_*` builders consume the
/// receiver, so no two tables ever share a tag set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawTable", into = "RawTable")]
pub struct Table {
    rows: usize,
    dims: Vec<String>,
    data: Vec<f64>,
    legends: Vec<Option<Legend>>,
    tags: TagSet,
    hash: OnceLock<ContentHash>,
}

#[derive(Serialize, Deserialize)]
struct RawTable {
    dims: Vec<String>,
    data: Vec<f64>,
    legends: Vec<Option<Legend>>,
    tags: TagSet,
}

impl TryFrom<RawTable> for Table {
    type Error = TableError;

    fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
        Ok(Self::new(raw.data, raw.dims)?
            .with_legends(raw.legends)?
            .with_tags(raw.tags))
    }
}

impl From<Table> for RawTable {
    fn from(table: Table) -> Self {
        Self {
            dims: table.dims,
            data: table.data,
            legends: table.legends,
            tags: table.tags,
        }
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows
            && self.dims == other.dims
            && self.data == other.data
            && self.legends == other.legends
            && self.tags == other.tags
    }
}

impl Table {
    /// Builds a table from row-major `data`.
    pub fn new<I, S>(data: Vec<f64>, dims: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dims = dims.into_iter().map(Into::into).collect::<Vec<String>>();

        let mut seen = HashSet::with_capacity(dims.len());
        for dim in &dims {
            if !seen.insert(dim.as_str()) {
                return Err(TableError::DuplicateDimension(dim.clone()));
            }
        }

        let rows = match dims.len() {
            0 if data.is_empty() => 0,
            0 => {
                return Err(TableError::DataShape {
                    values: data.len(),
                    columns: 0,
                });
            }
            columns if data.len() % columns == 0 => data.len() / columns,
            columns => {
                return Err(TableError::DataShape {
                    values: data.len(),
                    columns,
                });
            }
        };

        Ok(Self {
            rows,
            legends: vec![None; dims.len()],
            dims,
            data,
            tags: TagSet::new(),
            hash: OnceLock::new(),
        })
    }

    pub fn from_matrix<I, S>(matrix: Matrix, dims: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rows = matrix.rows();
        let table = Self::new(matrix.into_values(), dims)?;
        if table.rows != rows && !table.dims.is_empty() {
            return Err(TableError::DataShape {
                values: table.data.len(),
                columns: table.dims.len(),
            });
        }
        Ok(table)
    }

    pub fn from_rows<I, S>(rows: Vec<Vec<f64>>, dims: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dims = dims.into_iter().map(Into::into).collect::<Vec<String>>();
        if let Some((row, values)) = rows
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != dims.len())
        {
            return Err(TypeError::RaggedRow {
                row,
                expected: dims.len(),
                found: values.len(),
            }
            .into());
        }
        Self::new(rows.into_iter().flatten().collect(), dims)
    }

    /// Same dims, legends and tags; no rows.
    #[must_use]
    pub fn empty_like(&self) -> Self {
        self.derive(Vec::new())
    }

    /// Table with this table's layout over `data`, which must hold whole
    /// rows of `self.columns()` values.
    pub(crate) fn derive(&self, data: Vec<f64>) -> Self {
        let rows = if self.dims.is_empty() {
            0
        } else {
            data.len() / self.dims.len()
        };
        Self {
            rows,
            dims: self.dims.clone(),
            data,
            legends: self.legends.clone(),
            tags: self.tags.clone(),
            hash: OnceLock::new(),
        }
    }

    /// Public form of [`Table::derive`] for sibling crates building tables
    /// that keep this layout.
    pub fn with_data(&self, data: Vec<f64>) -> Result<Self, TableError> {
        let columns = self.dims.len();
        if (columns == 0 && !data.is_empty()) || (columns > 0 && data.len() % columns != 0) {
            return Err(TableError::DataShape {
                values: data.len(),
                columns,
            });
        }
        Ok(self.derive(data))
    }

    pub fn with_legends(mut self, legends: Vec<Option<Legend>>) -> Result<Self, TableError> {
        if legends.len() != self.dims.len() {
            return Err(TableError::LegendCount {
                legends: legends.len(),
                dims: self.dims.len(),
            });
        }
        self.legends = legends;
        Ok(self)
    }

    pub fn with_legend(mut self, dim: &str, legend: Option<Legend>) -> Result<Self, TableError> {
        let position = self.dim_index(dim)?;
        self.legends[position] = legend;
        Ok(self)
    }

    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }

    #[must_use]
    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.with_tag(NAME_TAG, name)
    }

    /// Records `parent`'s content hash as an audit back-link.
    #[must_use]
    pub fn with_origin(self, parent: &Self) -> Self {
        let origin = parent.content_hash().to_string();
        self.with_tag(ORIGIN_TAG, origin)
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn columns(&self) -> usize {
        self.dims.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    #[must_use]
    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    #[must_use]
    pub fn legends(&self) -> &[Option<Legend>] {
        &self.legends
    }

    #[must_use]
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.tags.get(NAME_TAG)
    }

    /// `"<name> <suffix>"`, or just the suffix for unnamed tables.
    #[must_use]
    pub fn sub_name(&self, suffix: &str) -> String {
        match self.name() {
            Some(name) if !name.is_empty() => format!("{name} {suffix}"),
            _ => suffix.to_owned(),
        }
    }

    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[must_use]
    pub fn row(&self, row: usize) -> Option<&[f64]> {
        if row >= self.rows {
            return None;
        }
        let width = self.dims.len();
        Some(&self.data[row * width..(row + 1) * width])
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.rows).filter_map(move |row| self.row(row))
    }

    #[must_use]
    pub fn has_dim(&self, dim: &str) -> bool {
        self.dims.iter().any(|existing| existing == dim)
    }

    pub fn dim_index(&self, dim: &str) -> Result<usize, TableError> {
        self.dims
            .iter()
            .position(|existing| existing == dim)
            .ok_or_else(|| self.unknown(vec![dim.to_owned()]))
    }

    /// Resolves every name, reporting all missing ones at once.
    pub fn dim_indices<S: AsRef<str>>(&self, dims: &[S]) -> Result<Vec<usize>, TableError> {
        let mut positions = Vec::with_capacity(dims.len());
        let mut missing = Vec::new();
        for dim in dims {
            let dim = dim.as_ref();
            match self.dims.iter().position(|existing| existing == dim) {
                Some(position) => positions.push(position),
                None => missing.push(dim.to_owned()),
            }
        }
        if missing.is_empty() {
            Ok(positions)
        } else {
            Err(self.unknown(missing))
        }
    }

    fn unknown(&self, missing: Vec<String>) -> TableError {
        TableError::UnknownDimension {
            missing,
            available: self.dims.clone(),
        }
    }

    /// Rows by the requested dims.
    pub fn get<S: AsRef<str>>(&self, dims: &[S]) -> Result<Matrix, TableError> {
        self.get_points(dims)
    }

    /// One row per observation, one column per requested dim.
    pub fn get_points<S: AsRef<str>>(&self, dims: &[S]) -> Result<Matrix, TableError> {
        let positions = self.dim_indices(dims)?;
        let mut values = Vec::with_capacity(self.rows * positions.len());
        for row in self.iter_rows() {
            values.extend(positions.iter().map(|&position| row[position]));
        }
        Ok(Matrix::new(self.rows, positions.len(), values)?)
    }

    /// One row per requested dim; the transpose of [`Table::get_points`].
    pub fn get_cols<S: AsRef<str>>(&self, dims: &[S]) -> Result<Matrix, TableError> {
        Ok(self.get_points(dims)?.transpose())
    }

    pub fn column(&self, dim: &str) -> Result<Vec<f64>, TableError> {
        let position = self.dim_index(dim)?;
        Ok(self.iter_rows().map(|row| row[position]).collect())
    }

    pub fn value(&self, dim: &str, row: usize) -> Result<f64, TableError> {
        let position = self.dim_index(dim)?;
        self.row(row)
            .map(|values| values[position])
            .ok_or(TableError::RowOutOfBounds {
                row,
                rows: self.rows,
            })
    }

    pub fn legend(&self, dim: &str) -> Result<Option<&Legend>, TableError> {
        let position = self.dim_index(dim)?;
        Ok(self.legends[position].as_ref())
    }

    /// Distinct codes present in `dim` with their labels, or `None` when the
    /// dim has no legend.
    pub fn legend_values(&self, dim: &str) -> Result<Option<Vec<(f64, Option<String>)>>, TableError> {
        let Some(legend) = self.legend(dim)? else {
            return Ok(None);
        };
        let mut codes = self.column(dim)?;
        codes.sort_by(f64::total_cmp);
        codes.dedup_by(|a, b| a.total_cmp(b).is_eq());
        Ok(Some(
            codes
                .into_iter()
                .map(|code| (code, legend.label_of(code).map(str::to_owned)))
                .collect(),
        ))
    }

    /// Smallest value of `dim`; NaN cells are skipped.
    pub fn min(&self, dim: &str) -> Result<f64, TableError> {
        self.extreme(dim, "min", f64::min)
    }

    /// Largest value of `dim`; NaN cells are skipped.
    pub fn max(&self, dim: &str) -> Result<f64, TableError> {
        self.extreme(dim, "max", f64::max)
    }

    fn extreme(
        &self,
        dim: &str,
        op: &'static str,
        pick: fn(f64, f64) -> f64,
    ) -> Result<f64, TableError> {
        if self.rows == 0 {
            return Err(TableError::EmptyTable { op });
        }
        self.column(dim)?
            .into_iter()
            .filter(|value| !value.is_nan())
            .reduce(pick)
            .ok_or_else(|| TableError::AllNaN {
                op,
                dim: dim.to_owned(),
            })
    }

    pub fn min_memo(&self, dim: &str, cache: &MemoCache) -> Result<f64, TableError> {
        let key = KeyBuilder::new(categories::MIN)
            .hash(self.content_hash())
            .text(dim)
            .finish();
        cache.memoize(key, || self.min(dim)).map(|value| *value)
    }

    pub fn max_memo(&self, dim: &str, cache: &MemoCache) -> Result<f64, TableError> {
        let key = KeyBuilder::new(categories::MAX)
            .hash(self.content_hash())
            .text(dim)
            .finish();
        cache.memoize(key, || self.max(dim)).map(|value| *value)
    }

    /// SHA-256 over the row-major values and the dimension names. Legends and
    /// tags do not participate. Computed once per instance.
    pub fn content_hash(&self) -> &ContentHash {
        self.hash.get_or_init(|| {
            let mut hasher = ContentHasher::new();
            hasher.update_u64(self.rows as u64);
            hasher.update_values(&self.data);
            hasher.update_u64(self.dims.len() as u64);
            for dim in &self.dims {
                hasher.update_str(dim);
            }
            hasher.finish()
        })
    }

    /// Rows at `rows`, in the given order. Dims, legends and tags carry over.
    pub fn sub_table(&self, rows: &[usize]) -> Result<Self, TableError> {
        let mut data = Vec::with_capacity(rows.len() * self.dims.len());
        for &row in rows {
            let values = self.row(row).ok_or(TableError::RowOutOfBounds {
                row,
                rows: self.rows,
            })?;
            data.extend_from_slice(values);
        }
        Ok(self.derive(data))
    }

    /// Rows whose mask entry is `true`, in their original order.
    pub fn filter_rows(&self, mask: &[bool]) -> Result<Self, TableError> {
        if mask.len() != self.rows {
            return Err(TableError::MaskLength {
                mask: mask.len(),
                rows: self.rows,
            });
        }
        let mut data = Vec::new();
        for (values, keep) in self.iter_rows().zip(mask) {
            if *keep {
                data.extend_from_slice(values);
            }
        }
        Ok(self.derive(data))
    }
}

/// Stacks the rows of `tables`. All tables must share the same dims; the
/// result takes the first table's legends and carries no tags.
pub fn concat(tables: &[Table]) -> Result<Table, TableError> {
    let first = tables
        .first()
        .ok_or(TableError::EmptyInput { op: "concat" })?;
    ensure_same_dims(tables)?;

    let mut data = Vec::with_capacity(tables.iter().map(|table| table.data.len()).sum());
    for table in tables {
        data.extend_from_slice(&table.data);
    }
    Ok(first.derive(data).with_tags(TagSet::new()))
}

/// Fails with `ShapeMismatch` naming the first table whose dims differ from
/// the first table's.
pub fn ensure_same_dims(tables: &[Table]) -> Result<(), TableError> {
    let Some(first) = tables.first() else {
        return Ok(());
    };
    for (position, table) in tables.iter().enumerate().skip(1) {
        if table.dims != first.dims {
            return Err(TableError::ShapeMismatch {
                position,
                name: table.name().unwrap_or("<unnamed>").to_owned(),
                expected: format!("dims {:?}", first.dims),
                found: format!("dims {:?}", table.dims),
            });
        }
    }
    Ok(())
}

/// Makes `names` usable as dimension names: a repeated name gets its
/// position appended as `name#i`.
#[must_use]
pub fn unique_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = BTreeSet::new();
    names
        .into_iter()
        .enumerate()
        .map(|(position, name)| {
            let name = name.into();
            let candidate = if seen.contains(&name) {
                format!("{name}#{position}")
            } else {
                name
            };
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}
