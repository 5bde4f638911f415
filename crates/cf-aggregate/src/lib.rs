#![forbid(unsafe_code)]

//! Derived tables computed across rows, dimensions or whole tables.
//!
//! Every operation is a pure function of its input tables; results that are
//! expensive to recompute have `_memo` variants keyed by content hash.

use cf_runtime::OracleError;
use cf_table::TableError;
use cf_types::TypeError;
use thiserror::Error;

pub mod ks;
pub mod matrix;
pub mod oracle;
pub mod pairwise;
pub mod window;

pub use ks::{ks_distance_fn, ks_distances, ks_distances_memo, ks_statistic, multi_dim_ks_distance};
pub use matrix::{distance_matrix, mean_table};
pub use oracle::{add_reduced_dims, cluster_split};
pub use pairwise::{
    PairwiseOptions, PairwiseReport, PairwiseStatistic, correlation_matrix, mutual_information,
    mutual_information_matrix, pairwise_matrix, pairwise_matrix_memo,
};
pub use window::{WindowSpec, window_aggregate};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregateError {
    #[error("invalid window: size {size} with overlap {overlap}; size must be positive and larger than overlap")]
    InvalidWindow { size: usize, overlap: usize },
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}
