#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use cf_table::TableError;
use cf_types::{Legend, TagSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod loader;
pub mod resolve;

pub use loader::{CsvEventLoader, EventLoader, LoadError, LoadRequest};
pub use resolve::{CountReport, ResolveReport, Resolved};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("malformed manifest at line {line}: {reason}")]
    MalformedManifest { line: usize, reason: String },
    #[error("no data matching {query}: {matched} entries matched, {failed} failed to load")]
    NoMatchingData {
        query: String,
        matched: usize,
        failed: usize,
    },
    #[error("no *.{extension} files in {}", dir.display())]
    EmptyDirectory { dir: PathBuf, extension: String },
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// One manifest entry: a data file and its tags, in manifest order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub filename: String,
    pub tags: TagSet,
}

impl IndexEntry {
    #[must_use]
    pub fn new(filename: impl Into<String>, tags: TagSet) -> Self {
        Self {
            filename: filename.into(),
            tags,
        }
    }
}

/// Ordered entries plus the sorted union of their tag keys, each with a
/// legend built from every value the key takes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    entries: Vec<IndexEntry>,
    base_dir: PathBuf,
    tags: Vec<String>,
    legends: Vec<Legend>,
}

impl Index {
    /// Entry files are resolved relative to `base_dir`.
    #[must_use]
    pub fn new(entries: Vec<IndexEntry>, base_dir: impl Into<PathBuf>) -> Self {
        let tags = entries
            .iter()
            .flat_map(|entry| entry.tags.keys().map(str::to_owned))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        let legends = tags
            .iter()
            .map(|tag| Legend::for_values(values_for_tag(&entries, tag)))
            .collect();
        Self {
            entries,
            base_dir: base_dir.into(),
            tags,
            legends,
        }
    }

    /// Parses manifest text.
    ///
    /// An unindented line starts an entry named by the trimmed line. Lines
    /// indented by a tab or two spaces hold `key: value` tags for the current
    /// entry; the first colon separates key from value. Indented lines without
    /// a colon and blank lines are ignored.
    pub fn parse(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut entries: Vec<IndexEntry> = Vec::new();

        for (position, line) in text.lines().enumerate() {
            let line_number = position + 1;
            if line.trim().is_empty() {
                continue;
            }
            if !(line.starts_with('\t') || line.starts_with("  ")) {
                entries.push(IndexEntry::new(line.trim(), TagSet::new()));
                continue;
            }

            let Some(entry) = entries.last_mut() else {
                return Err(IndexError::MalformedManifest {
                    line: line_number,
                    reason: "indented line before any filename".to_owned(),
                });
            };
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return Err(IndexError::MalformedManifest {
                    line: line_number,
                    reason: format!("tag line {:?} needs a non-empty key and value", line.trim()),
                });
            }
            entry.tags.insert(key, value);
        }

        Ok(Self::new(entries, base_dir))
    }

    /// Reads a manifest; entry files are resolved next to it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, base_dir)
    }

    /// Manifest text that parses back to an equal index.
    #[must_use]
    pub fn to_manifest(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.filename);
            out.push('\n');
            for (key, value) in entry.tags.iter() {
                out.push('\t');
                out.push_str(key);
                out.push_str(": ");
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IndexError> {
        let path = path.as_ref();
        fs::write(path, self.to_manifest()).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds an index from the files in `dir` ending in `.extension`,
    /// sorted by name. `tagger` derives each file's tags from its name; files
    /// it returns `None` for are skipped.
    pub fn scan_dir<F>(dir: impl AsRef<Path>, extension: &str, mut tagger: F) -> Result<Self, IndexError>
    where
        F: FnMut(&str) -> Option<TagSet>,
    {
        let dir = dir.as_ref();
        let io_error = |source| IndexError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut names = Vec::new();
        for item in fs::read_dir(dir).map_err(io_error)? {
            let path = item.map_err(io_error)?.path();
            if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                names.push(name.to_owned());
            }
        }
        names.sort();
        if names.is_empty() {
            return Err(IndexError::EmptyDirectory {
                dir: dir.to_path_buf(),
                extension: extension.to_owned(),
            });
        }

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            match tagger(&name) {
                Some(tags) => entries.push(IndexEntry::new(name, tags)),
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(file = %name, "file name not understood, skipping");
                }
            }
        }
        Ok(Self::new(entries, dir))
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[must_use]
    pub fn path_of(&self, entry: &IndexEntry) -> PathBuf {
        self.base_dir.join(&entry.filename)
    }

    /// Sorted union of tag keys.
    #[must_use]
    pub fn all_tags(&self) -> &[String] {
        &self.tags
    }

    /// Sorted distinct values of `tag` across entries.
    #[must_use]
    pub fn all_values_for_tag(&self, tag: &str) -> Vec<String> {
        values_for_tag(&self.entries, tag)
    }

    /// Legends aligned with [`Index::all_tags`].
    #[must_use]
    pub fn legends(&self) -> &[Legend] {
        &self.legends
    }

    #[must_use]
    pub fn legend(&self, tag: &str) -> Option<&Legend> {
        let position = self.tags.iter().position(|existing| existing == tag)?;
        self.legends.get(position)
    }
}

fn values_for_tag(entries: &[IndexEntry], tag: &str) -> Vec<String> {
    entries
        .iter()
        .filter_map(|entry| entry.tags.get(tag))
        .map(str::to_owned)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMatch {
    Equals(String),
    AnyOf(Vec<String>),
}

impl TagMatch {
    fn accepts(&self, value: &str) -> bool {
        match self {
            Self::Equals(expected) => expected == value,
            Self::AnyOf(options) => options.iter().any(|option| option == value),
        }
    }
}

/// Conjunction of per-tag conditions. An empty query matches nothing, and an
/// entry without a queried tag never matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagQuery {
    clauses: Vec<(String, TagMatch)>,
}

impl TagQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn equals(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.clauses.push((tag.into(), TagMatch::Equals(value.into())));
        self
    }

    #[must_use]
    pub fn any_of<I, S>(mut self, tag: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses.push((tag.into(), TagMatch::AnyOf(values)));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    #[must_use]
    pub fn matches(&self, tags: &TagSet) -> bool {
        !self.clauses.is_empty()
            && self
                .clauses
                .iter()
                .all(|(tag, condition)| tags.get(tag).is_some_and(|value| condition.accepts(value)))
    }
}

impl fmt::Display for TagQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("<empty query>");
        }
        for (position, (tag, condition)) in self.clauses.iter().enumerate() {
            if position > 0 {
                f.write_str(", ")?;
            }
            match condition {
                TagMatch::Equals(value) => write!(f, "{tag}={value}")?,
                TagMatch::AnyOf(values) => write!(f, "{tag} in [{}]", values.join(", "))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cf_types::{NO_VALUE_LABEL, TagSet};

    use super::{Index, IndexEntry, IndexError, TagQuery};

    const MANIFEST: &str = "fileA.csv\n\tstim: a\n\ttube: 1\nfileB.csv\n  stim: b\n  tube: 2\n  note without colon\n\nfileC.csv\n";

    #[test]
    fn parse_collects_entries_and_sorted_tags() {
        let index = Index::parse(MANIFEST, "/data").expect("parse");
        assert_eq!(index.len(), 3);
        assert_eq!(index.entries()[0].filename, "fileA.csv");
        assert_eq!(index.entries()[1].tags.get("tube"), Some("2"));
        assert!(index.entries()[2].tags.is_empty());
        assert_eq!(index.all_tags(), &["stim", "tube"]);
        assert_eq!(index.all_values_for_tag("stim"), vec!["a", "b"]);
        assert_eq!(index.path_of(&index.entries()[0]), std::path::Path::new("/data/fileA.csv"));
    }

    #[test]
    fn legends_follow_value_kinds() {
        let index = Index::parse(MANIFEST, ".").expect("parse");
        let stim = index.legend("stim").expect("stim legend");
        assert_eq!(stim.code_of("a"), Some(1.0));
        assert_eq!(stim.code_of("b"), Some(2.0));
        assert_eq!(stim.code_of(NO_VALUE_LABEL), Some(0.0));
        let tube = index.legend("tube").expect("tube legend");
        assert_eq!(tube.code_of("2"), Some(2.0));
        assert_eq!(tube.label_of(0.0), Some(NO_VALUE_LABEL));
    }

    #[test]
    fn first_colon_separates_key_and_value() {
        let index = Index::parse("f\n\ttime: 10:30\n", ".").expect("parse");
        assert_eq!(index.entries()[0].tags.get("time"), Some("10:30"));
    }

    #[test]
    fn indented_line_before_filename_is_malformed() {
        let err = Index::parse("\tstim: a\nfileA\n", ".").expect_err("malformed");
        assert_eq!(
            err.to_string(),
            "malformed manifest at line 1: indented line before any filename"
        );
        assert!(matches!(
            Index::parse("fileA\n\tstim:\n", "."),
            Err(IndexError::MalformedManifest { line: 2, .. })
        ));
    }

    #[test]
    fn manifest_round_trips() {
        let index = Index::parse(MANIFEST, ".").expect("parse");
        let again = Index::parse(&index.to_manifest(), ".").expect("reparse");
        assert_eq!(again, index);
    }

    #[test]
    fn queries_are_conjunctive_and_empty_matches_nothing() {
        let tags = TagSet::new().with("stim", "a").with("tube", "1");
        assert!(TagQuery::new().equals("stim", "a").matches(&tags));
        assert!(
            TagQuery::new()
                .any_of("stim", ["a", "b"])
                .equals("tube", "1")
                .matches(&tags)
        );
        assert!(!TagQuery::new().equals("stim", "a").equals("tube", "2").matches(&tags));
        assert!(!TagQuery::new().equals("donor", "x").matches(&tags));
        assert!(!TagQuery::new().matches(&tags));
        assert_eq!(
            TagQuery::new().any_of("stim", ["a", "b"]).equals("tube", "1").to_string(),
            "stim in [a, b], tube=1"
        );
    }

    #[test]
    fn scan_dir_tags_files_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["b_stim1.csv", "a_stim2.csv", "notes.txt"] {
            std::fs::write(dir.path().join(name), "x\n1\n").expect("write");
        }
        let index = Index::scan_dir(dir.path(), "csv", |name| {
            let stim = name.split('_').nth(1)?.strip_suffix(".csv")?;
            Some(TagSet::new().with("stim", stim))
        })
        .expect("scan");
        let names = index
            .entries()
            .iter()
            .map(|entry| entry.filename.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a_stim2.csv", "b_stim1.csv"]);
        assert_eq!(index.entries()[0], IndexEntry::new("a_stim2.csv", TagSet::new().with("stim", "stim2")));

        let empty = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            Index::scan_dir(empty.path(), "fcs", |_| Some(TagSet::new())),
            Err(IndexError::EmptyDirectory { .. })
        ));
    }
}
