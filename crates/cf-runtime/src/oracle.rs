use std::collections::BTreeMap;

use cf_types::Matrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("numeric oracle is unavailable for routine {routine:?}")]
    Unavailable { routine: String },
    #[error("numeric oracle routine {routine:?} failed: {detail}")]
    Failed { routine: String, detail: String },
    #[error("numeric oracle routine {routine:?} returned an unusable result: {detail}")]
    MalformedResult { routine: String, detail: String },
}

/// Named scalar parameters passed along with the points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleParams {
    values: BTreeMap<String, f64>,
}

impl OracleParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.values.iter().map(|(key, value)| (key.as_str(), *value))
    }
}

/// External numeric routines (density estimation, clustering, dimensionality
/// reduction) that the engine can delegate to but never depends on.
///
/// Implementations must not retain `points`; every call is synchronous.
pub trait NumericOracle {
    fn compute(
        &self,
        routine: &str,
        points: &Matrix,
        params: &OracleParams,
    ) -> Result<Matrix, OracleError>;

    /// Names this oracle in memoization keys. Defaults to the type name;
    /// override when two instances of one type can return different results.
    fn identity(&self) -> String {
        std::any::type_name::<Self>().to_owned()
    }
}

impl<O: NumericOracle + ?Sized> NumericOracle for &O {
    fn compute(
        &self,
        routine: &str,
        points: &Matrix,
        params: &OracleParams,
    ) -> Result<Matrix, OracleError> {
        (**self).compute(routine, points, params)
    }

    fn identity(&self) -> String {
        (**self).identity()
    }
}

/// Oracle stand-in for hosts without one: every routine is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOracle;

impl NumericOracle for NoOracle {
    fn compute(
        &self,
        routine: &str,
        _points: &Matrix,
        _params: &OracleParams,
    ) -> Result<Matrix, OracleError> {
        Err(OracleError::Unavailable {
            routine: routine.to_owned(),
        })
    }
}
