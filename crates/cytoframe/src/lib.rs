#![forbid(unsafe_code)]

//! Cytometry table engine.
//!
//! Re-exports the workspace crates under one roof. Most callers only need the
//! [`prelude`]:
//!
//! ```no_run
//! use cytoframe::prelude::*;
//!
//! let index = Index::load("experiment/index.txt")?;
//! let stimulated = index.resolve(
//!     &TagQuery::new().any_of("stim", ["a", "b"]),
//!     &CsvEventLoader::new(),
//!     Some(0.2),
//! )?;
//! let gated = gate(&stimulated.table, &[DimRange::new("CD3", 1.0, 8.0)])?;
//! let smoothed = window_aggregate(
//!     &gated,
//!     "CD3",
//!     WindowSpec::default(),
//!     AggMethod::Median,
//!     EngineConfig::default().window_batch_values,
//! )?;
//! # let _ = smoothed;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use cf_aggregate as aggregate;
pub use cf_gate as gating;
pub use cf_index as index;
pub use cf_runtime as runtime;
pub use cf_table as table;
pub use cf_types as types;

pub use cf_aggregate::{
    AggregateError, PairwiseOptions, PairwiseReport, PairwiseStatistic, WindowSpec,
    add_reduced_dims, cluster_split, correlation_matrix, distance_matrix, ks_distances,
    ks_distances_memo, mean_table, multi_dim_ks_distance, mutual_information_matrix,
    pairwise_matrix, pairwise_matrix_memo, window_aggregate,
};
pub use cf_gate::{Bins, GateError, discretize, gate, gate_out, remove_bad_cells, split};
pub use cf_index::{
    CountReport, CsvEventLoader, EventLoader, Index, IndexEntry, IndexError, LoadError,
    LoadRequest, ResolveReport, Resolved, TagMatch, TagQuery,
};
pub use cf_runtime::{
    CacheKey, CacheStats, ContentHash, EngineConfig, KeyBuilder, MemoCache, NoOracle,
    NumericOracle, OracleError, OracleParams, RuntimeError,
};
pub use cf_table::{Table, TableError, concat, ensure_same_dims};
pub use cf_types::{
    AggMethod, DimRange, Legend, Matrix, NO_VALUE_LABEL, TagSet, TypeError,
};

#[cfg(feature = "tracing")]
pub use tracing;

pub mod prelude {
    pub use crate::{
        AggMethod, Bins, CsvEventLoader, DimRange, EngineConfig, EventLoader, Index, Legend,
        MemoCache, Table, TagQuery, TagSet, WindowSpec, concat, distance_matrix, gate, gate_out,
        mean_table, split, window_aggregate,
    };
}
