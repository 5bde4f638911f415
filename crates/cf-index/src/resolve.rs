//! Turning tag queries into one merged table.

use cf_table::{Table, concat};
use cf_types::{NO_VALUE_LABEL, TagSet};
use serde::{Deserialize, Serialize};

use crate::{EventLoader, Index, IndexEntry, IndexError, LoadRequest, TagQuery};

/// What happened to each matching entry during a resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveReport {
    pub matched: usize,
    pub loaded: usize,
    /// Files the loader reported as holding no usable events.
    pub empty: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub table: Table,
    pub report: ResolveReport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountReport {
    pub cells: usize,
    pub matched: usize,
    pub failed: usize,
}

impl Index {
    /// Loads every entry matching `query` and concatenates the results.
    pub fn resolve<L: EventLoader>(
        &self,
        query: &TagQuery,
        loader: &L,
        transform_factor: Option<f64>,
    ) -> Result<Resolved, IndexError> {
        self.resolve_matching(&query.to_string(), |tags| query.matches(tags), loader, transform_factor)
    }

    /// [`Index::resolve`] with an arbitrary predicate over entry tags.
    pub fn resolve_with<P, L>(
        &self,
        predicate: P,
        loader: &L,
        transform_factor: Option<f64>,
    ) -> Result<Resolved, IndexError>
    where
        P: Fn(&TagSet) -> bool,
        L: EventLoader,
    {
        self.resolve_matching("<predicate>", predicate, loader, transform_factor)
    }

    fn resolve_matching<P, L>(
        &self,
        description: &str,
        predicate: P,
        loader: &L,
        transform_factor: Option<f64>,
    ) -> Result<Resolved, IndexError>
    where
        P: Fn(&TagSet) -> bool,
        L: EventLoader,
    {
        let mut report = ResolveReport::default();
        let mut tables = Vec::new();

        for entry in self.entries().iter().filter(|entry| predicate(&entry.tags)) {
            report.matched += 1;
            let path = self.path_of(entry);
            let codes = self.tag_codes(entry);
            let request = LoadRequest {
                path: &path,
                tag_names: self.all_tags(),
                tag_codes: &codes,
                legends: self.legends(),
                transform_factor,
            };
            match loader.load(&request) {
                Ok(Some(table)) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(file = %entry.filename, cells = table.rows(), "loaded entry");
                    report.loaded += 1;
                    tables.push(table);
                }
                Ok(None) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(file = %entry.filename, "entry holds no events, skipping");
                    report.empty += 1;
                }
                Err(_error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(file = %entry.filename, error = %_error, "failed to load entry, skipping");
                    report.failed += 1;
                }
            }
        }

        if tables.is_empty() {
            return Err(IndexError::NoMatchingData {
                query: description.to_owned(),
                matched: report.matched,
                failed: report.failed,
            });
        }

        let mut table = concat(&tables)?;
        for (tag, legend) in self.all_tags().iter().zip(self.legends()) {
            if table.has_dim(tag) {
                table = table.with_legend(tag, Some(legend.clone()))?;
            }
        }
        Ok(Resolved {
            table: table.with_name(description),
            report,
        })
    }

    /// Sums the loader's event counts over entries matching `query`. Entries
    /// whose count fails are skipped and counted.
    pub fn count<L: EventLoader>(&self, query: &TagQuery, loader: &L) -> CountReport {
        let mut report = CountReport::default();
        for entry in self.entries().iter().filter(|entry| query.matches(&entry.tags)) {
            report.matched += 1;
            match loader.count(&self.path_of(entry)) {
                Ok(cells) => report.cells += cells,
                Err(_error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(file = %entry.filename, error = %_error, "failed to count entry, skipping");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Code of each index tag for `entry`, using the `No Value` code for
    /// tags the entry lacks.
    #[must_use]
    pub fn tag_codes(&self, entry: &IndexEntry) -> Vec<f64> {
        self.all_tags()
            .iter()
            .zip(self.legends())
            .map(|(tag, legend)| {
                let label = entry.tags.get(tag).unwrap_or(NO_VALUE_LABEL);
                legend
                    .code_of(label)
                    .or_else(|| legend.no_value_code())
                    .unwrap_or(0.0)
            })
            .collect()
    }
}
