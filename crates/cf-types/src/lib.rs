#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label reserved for "this entry carries no value for the tag".
pub const NO_VALUE_LABEL: &str = "No Value";

/// Tag key under which a table's display name is stored.
pub const NAME_TAG: &str = "name";

/// Tag key holding the content hash of the table a derived table came from.
pub const ORIGIN_TAG: &str = "origin";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("matrix shape {rows}x{cols} does not match {len} values")]
    MatrixShape { rows: usize, cols: usize, len: usize },
    #[error("matrix row {row} has {found} values, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("unsupported aggregation method {method:?}; expected one of: median, average")]
    UnsupportedAggregationMethod { method: String },
}

/// Parses `value` as a finite number, the way manifest tag values are probed.
#[must_use]
pub fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
}

#[must_use]
pub fn is_number(value: &str) -> bool {
    parse_number(value).is_some()
}

/// Dense row-major `rows x cols` matrix of `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, values: Vec<f64>) -> Result<Self, TypeError> {
        if rows.checked_mul(cols) != Some(values.len()) {
            return Err(TypeError::MatrixShape {
                rows,
                cols,
                len: values.len(),
            });
        }
        Ok(Self { rows, cols, values })
    }

    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, TypeError> {
        let cols = rows.first().map_or(0, Vec::len);
        let row_count = rows.len();
        let mut values = Vec::with_capacity(row_count * cols);
        for (row, items) in rows.into_iter().enumerate() {
            if items.len() != cols {
                return Err(TypeError::RaggedRow {
                    row,
                    expected: cols,
                    found: items.len(),
                });
            }
            values.extend(items);
        }
        Self::new(row_count, cols, values)
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.values.get(row * self.cols + col).copied()
    }

    #[must_use]
    pub fn row(&self, row: usize) -> Option<&[f64]> {
        if row >= self.rows {
            return None;
        }
        let start = row * self.cols;
        Some(&self.values[start..start + self.cols])
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.rows).map(move |row| {
            let start = row * self.cols;
            &self.values[start..start + self.cols]
        })
    }

    #[must_use]
    pub fn column(&self, col: usize) -> Option<Vec<f64>> {
        if col >= self.cols {
            return None;
        }
        Some(self.iter_rows().map(|row| row[col]).collect())
    }

    #[must_use]
    pub fn transpose(&self) -> Self {
        let mut values = Vec::with_capacity(self.values.len());
        for col in 0..self.cols {
            values.extend(self.iter_rows().map(|row| row[col]));
        }
        Self {
            rows: self.cols,
            cols: self.rows,
            values,
        }
    }
}

/// Numeric code of a categorical value. Ordered and compared by total order so
/// it can key a map; `-0.0` is folded into `0.0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegendCode(f64);

impl LegendCode {
    #[must_use]
    pub fn new(value: f64) -> Self {
        if value == 0.0 {
            Self(0.0)
        } else {
            Self(value)
        }
    }

    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for LegendCode {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl PartialEq for LegendCode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LegendCode {}

impl PartialOrd for LegendCode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LegendCode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for LegendCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub code: f64,
    pub label: String,
}

/// Two-sided mapping between numeric codes and category labels of one
/// dimension. Codes and labels live in separate maps, so a label spelled like
/// a number never shadows a code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<LegendEntry>", into = "Vec<LegendEntry>")]
pub struct Legend {
    labels: BTreeMap<LegendCode, String>,
    codes: BTreeMap<String, LegendCode>,
}

impl Legend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the legend of a tag from every value observed for it.
    ///
    /// Values that all parse as distinct finite numbers keep their numeric
    /// value as code; otherwise codes `1..=n` are handed out in sorted label
    /// order. [`NO_VALUE_LABEL`] is added under code `0`, or one below the
    /// smallest code when `0` is taken.
    #[must_use]
    pub fn for_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique = values
            .into_iter()
            .map(|value| value.as_ref().to_owned())
            .collect::<BTreeSet<_>>();

        let numeric = unique
            .iter()
            .map(|value| parse_number(value).map(LegendCode::new))
            .collect::<Option<BTreeSet<_>>>()
            .filter(|codes| codes.len() == unique.len());

        let mut legend = Self::new();
        if numeric.is_some() {
            for label in &unique {
                if let Some(code) = parse_number(label) {
                    legend = legend.with_entry(code, label.clone());
                }
            }
        } else {
            for (position, label) in unique.iter().enumerate() {
                legend = legend.with_entry((position + 1) as f64, label.clone());
            }
        }

        if !legend.codes.contains_key(NO_VALUE_LABEL) {
            let zero = LegendCode::new(0.0);
            let sentinel = if legend.labels.contains_key(&zero) {
                legend
                    .labels
                    .keys()
                    .next()
                    .map_or(0.0, |min| {
                        let min = min.value();
                        // Past 2^53, `min - 1` rounds back to `min`.
                        if min - 1.0 < min { min - 1.0 } else { min - min.abs() }
                    })
            } else {
                0.0
            };
            legend = legend.with_entry(sentinel, NO_VALUE_LABEL);
        }

        legend
    }

    /// Later entries replace earlier ones on either side, keeping the mapping
    /// one-to-one.
    #[must_use]
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (f64, S)>,
        S: Into<String>,
    {
        entries
            .into_iter()
            .fold(Self::new(), |legend, (code, label)| {
                legend.with_entry(code, label)
            })
    }

    #[must_use]
    pub fn with_entry(mut self, code: f64, label: impl Into<String>) -> Self {
        let code = LegendCode::new(code);
        let label = label.into();
        if let Some(previous_label) = self.labels.remove(&code) {
            self.codes.remove(&previous_label);
        }
        if let Some(previous_code) = self.codes.remove(&label) {
            self.labels.remove(&previous_code);
        }
        self.labels.insert(code, label.clone());
        self.codes.insert(label, code);
        self
    }

    #[must_use]
    pub fn label_of(&self, code: f64) -> Option<&str> {
        self.labels.get(&LegendCode::new(code)).map(String::as_str)
    }

    #[must_use]
    pub fn code_of(&self, label: &str) -> Option<f64> {
        self.codes.get(label).map(|code| code.value())
    }

    #[must_use]
    pub fn no_value_code(&self) -> Option<f64> {
        self.code_of(NO_VALUE_LABEL)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Entries in ascending code order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &str)> + '_ {
        self.labels
            .iter()
            .map(|(code, label)| (code.value(), label.as_str()))
    }
}

impl From<Vec<LegendEntry>> for Legend {
    fn from(entries: Vec<LegendEntry>) -> Self {
        Self::from_entries(entries.into_iter().map(|entry| (entry.code, entry.label)))
    }
}

impl From<Legend> for Vec<LegendEntry> {
    fn from(legend: Legend) -> Self {
        legend
            .labels
            .into_iter()
            .map(|(code, label)| LegendEntry {
                code: code.value(),
                label,
            })
            .collect()
    }
}

/// Insertion-ordered string tags with map semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    entries: Vec<(String, String)>,
}

impl TagSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, keeping its original position if it already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let position = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(position).1)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut tags = Self::new();
        for (key, value) in iter {
            tags.insert(key, value);
        }
        tags
    }
}

/// Closed interval `[min, max]` on one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimRange {
    pub dim: String,
    pub min: f64,
    pub max: f64,
}

impl DimRange {
    #[must_use]
    pub fn new(dim: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            dim: dim.into(),
            min,
            max,
        }
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }

    #[must_use]
    pub fn violated_by(&self, value: f64) -> bool {
        value < self.min || value > self.max
    }
}

impl fmt::Display for DimRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3} < {} < {:.3}]", self.min, self.dim, self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggMethod {
    Median,
    Average,
}

impl AggMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Median => "median",
            Self::Average => "average",
        }
    }
}

impl FromStr for AggMethod {
    type Err = TypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "median" => Ok(Self::Median),
            "average" => Ok(Self::Average),
            _ => Err(TypeError::UnsupportedAggregationMethod {
                method: value.to_owned(),
            }),
        }
    }
}

impl fmt::Display for AggMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{AggMethod, DimRange, Legend, Matrix, NO_VALUE_LABEL, TagSet};

    #[test]
    fn numeric_tag_values_keep_their_value_as_code() {
        let legend = Legend::for_values(["3", "7"]);
        assert_eq!(legend.code_of("3"), Some(3.0));
        assert_eq!(legend.code_of("7"), Some(7.0));
        assert_eq!(legend.no_value_code(), Some(0.0));
    }

    #[test]
    fn textual_tag_values_get_sequential_codes_in_sorted_order() {
        let legend = Legend::for_values(["b", "a", "c", "a"]);
        assert_eq!(legend.code_of("a"), Some(1.0));
        assert_eq!(legend.code_of("b"), Some(2.0));
        assert_eq!(legend.code_of("c"), Some(3.0));
        assert_eq!(legend.label_of(0.0), Some(NO_VALUE_LABEL));
        assert_eq!(legend.len(), 4);
    }

    #[test]
    fn no_value_moves_below_the_smallest_code_when_zero_is_taken() {
        let legend = Legend::for_values(["0", "2", "5"]);
        assert_eq!(legend.no_value_code(), Some(-1.0));
        assert_eq!(legend.label_of(0.0), Some("0"));
    }

    #[test]
    fn numeric_collisions_fall_back_to_sequential_codes() {
        let legend = Legend::for_values(["1", "1.0"]);
        for label in ["1", "1.0"] {
            let code = legend.code_of(label).expect("code");
            assert_eq!(legend.label_of(code), Some(label));
        }
    }

    #[test]
    fn numeric_looking_label_does_not_shadow_codes() {
        let legend = Legend::new().with_entry(1.0, "2").with_entry(2.0, "x");
        assert_eq!(legend.label_of(2.0), Some("x"));
        assert_eq!(legend.code_of("2"), Some(1.0));
    }

    #[test]
    fn replacing_an_entry_keeps_the_mapping_one_to_one() {
        let legend = Legend::new().with_entry(1.0, "a").with_entry(1.0, "b");
        assert_eq!(legend.code_of("a"), None);
        assert_eq!(legend.label_of(1.0), Some("b"));
        assert_eq!(legend.len(), 1);
    }

    #[test]
    fn legend_serializes_as_entry_list() {
        let legend = Legend::for_values(["x"]);
        let json = serde_json::to_string(&legend).expect("serialize");
        assert_eq!(
            json,
            r#"[{"code":0.0,"label":"No Value"},{"code":1.0,"label":"x"}]"#
        );
        let back: Legend = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, legend);
    }

    #[test]
    fn tag_insert_keeps_position() {
        let mut tags = TagSet::new().with("name", "a").with("stim", "b");
        assert_eq!(tags.insert("name", "c"), Some("a".to_owned()));
        assert_eq!(tags.keys().collect::<Vec<_>>(), vec!["name", "stim"]);
        assert_eq!(tags.get("name"), Some("c"));
    }

    #[test]
    fn transpose_swaps_axes() {
        let matrix = Matrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]])
            .expect("matrix");
        let t = matrix.transpose();
        assert_eq!((t.rows(), t.cols()), (3, 2));
        assert_eq!(t.values(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(t.transpose(), matrix);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Matrix::from_rows(vec![vec![1.0], vec![1.0, 2.0]]).expect_err("ragged");
        assert_eq!(err.to_string(), "matrix row 1 has 2 values, expected 1");
    }

    #[test]
    fn dim_range_is_inclusive_and_displays_three_decimals() {
        let range = DimRange::new("CD3", 1.0, 2.0);
        assert!(range.contains(1.0) && range.contains(2.0));
        assert!(range.violated_by(2.5));
        assert_eq!(range.to_string(), "[1.000 < CD3 < 2.000]");
    }

    #[test]
    fn unknown_aggregation_method_fails_fast() {
        assert_eq!("Median".parse::<AggMethod>(), Ok(AggMethod::Median));
        let err = "mode".parse::<AggMethod>().expect_err("must fail");
        assert_eq!(
            err.to_string(),
            "unsupported aggregation method \"mode\"; expected one of: median, average"
        );
    }
}
