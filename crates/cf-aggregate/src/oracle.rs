//! Operations delegated to an external [`NumericOracle`]. None of them is
//! required for the rest of the engine; failures leave the input untouched.

use cf_runtime::{NumericOracle, OracleError, OracleParams};
use cf_table::Table;
use cf_types::Matrix;

use crate::AggregateError;

/// Clusters the rows of `table` on `dims` with the oracle routine `method`
/// (called with param `k`) and returns one table per cluster.
///
/// The oracle must answer with one 1-based assignment per row, as an
/// `rows x 1` matrix. Cluster `i` is named `"<name> <method> cluster <i>"`
/// and tagged with the source table as origin.
pub fn cluster_split<S, O>(
    table: &Table,
    dims: &[S],
    k: usize,
    method: &str,
    oracle: &O,
) -> Result<Vec<Table>, AggregateError>
where
    S: AsRef<str>,
    O: NumericOracle,
{
    let points = table.get_points(dims)?;
    let params = OracleParams::new().with("k", k as f64);
    let result = oracle.compute(method, &points, &params)?;
    if result.rows() != table.rows() || result.cols() != 1 {
        return Err(malformed(
            method,
            format!(
                "expected {}x1 cluster assignments, got {}x{}",
                table.rows(),
                result.rows(),
                result.cols()
            ),
        ));
    }

    let assignments = result.values();
    if let Some(bad) = assignments
        .iter()
        .find(|value| value.fract() != 0.0 || **value < 1.0 || **value > k as f64)
    {
        return Err(malformed(
            method,
            format!("assignment {bad} is not a cluster number in 1..={k}"),
        ));
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(method, k, rows = table.rows(), "oracle clustering finished");

    (1..=k)
        .map(|cluster| {
            let mask = assignments
                .iter()
                .map(|value| *value == cluster as f64)
                .collect::<Vec<_>>();
            Ok(table
                .filter_rows(&mask)?
                .with_name(table.sub_name(&format!("{method} cluster {}", cluster - 1)))
                .with_origin(table))
        })
        .collect()
}

/// Appends `components` columns named `<method>0 .. <method>{n-1}` computed by
/// the oracle routine `method` over `dims` (every dim when `None`).
///
/// The oracle answers either `rows x components`, or `m x (components + 1)`
/// with `m <= rows` when it keeps only a connected subset of the rows; the
/// trailing column then holds the 1-based source row of each output row and
/// only those rows are kept.
pub fn add_reduced_dims<O: NumericOracle>(
    table: &Table,
    method: &str,
    components: usize,
    dims: Option<&[String]>,
    oracle: &O,
) -> Result<Table, AggregateError> {
    let dims = dims.map_or_else(|| table.dims().to_vec(), <[String]>::to_vec);
    let points = table.get_points(&dims)?;
    let params = OracleParams::new().with("dims", components as f64);
    let result = oracle.compute(method, &points, &params)?;
    let names = (0..components)
        .map(|component| format!("{method}{component}"))
        .collect::<Vec<_>>();

    if result.rows() == table.rows() && result.cols() == components {
        return Ok(table.append_dims(&names, &result, None)?);
    }

    if result.cols() == components + 1 && result.rows() <= table.rows() {
        let mut kept = Vec::with_capacity(result.rows());
        let mut reduced = Vec::with_capacity(result.rows() * components);
        for row in result.iter_rows() {
            let (values, index) = row.split_at(components);
            let source = index[0];
            if source.fract() != 0.0 || source < 1.0 || source > table.rows() as f64 {
                return Err(malformed(
                    method,
                    format!("row index {source} is outside 1..={}", table.rows()),
                ));
            }
            kept.push(source as usize - 1);
            reduced.extend_from_slice(values);
        }
        let subset = table.sub_table(&kept)?;
        let reduced = Matrix::new(kept.len(), components, reduced)?;
        return Ok(subset.append_dims(&names, &reduced, None)?);
    }

    Err(malformed(
        method,
        format!(
            "expected {}x{components} reduced points, got {}x{}",
            table.rows(),
            result.rows(),
            result.cols()
        ),
    ))
}

fn malformed(routine: &str, detail: String) -> AggregateError {
    OracleError::MalformedResult {
        routine: routine.to_owned(),
        detail,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use cf_runtime::{NoOracle, NumericOracle, OracleError, OracleParams};
    use cf_table::Table;
    use cf_types::{Matrix, ORIGIN_TAG};

    use super::{add_reduced_dims, cluster_split};
    use crate::AggregateError;

    /// Assigns rows by the sign of their first coordinate and projects onto
    /// the coordinate sum; `isomap` drops the first row.
    struct SignOracle;

    impl NumericOracle for SignOracle {
        fn compute(
            &self,
            routine: &str,
            points: &Matrix,
            _params: &OracleParams,
        ) -> Result<Matrix, OracleError> {
            let rows = points.iter_rows();
            let result = match routine {
                "kmeans" => rows
                    .map(|row| vec![if row[0] < 0.0 { 1.0 } else { 2.0 }])
                    .collect(),
                "pca" => rows.map(|row| vec![row.iter().sum::<f64>()]).collect(),
                "isomap" => rows
                    .enumerate()
                    .skip(1)
                    .map(|(index, row)| vec![row[0], index as f64 + 1.0])
                    .collect(),
                other => {
                    return Err(OracleError::Failed {
                        routine: other.to_owned(),
                        detail: "unknown routine".to_owned(),
                    });
                }
            };
            Matrix::from_rows(result).map_err(|err| OracleError::Failed {
                routine: routine.to_owned(),
                detail: err.to_string(),
            })
        }
    }

    fn sample() -> Table {
        Table::from_rows(
            vec![vec![-1.0, 1.0], vec![2.0, 3.0], vec![-3.0, 5.0]],
            ["x", "y"],
        )
        .expect("table")
        .with_name("cells")
    }

    #[test]
    fn cluster_split_partitions_by_assignment() {
        let clusters = cluster_split(&sample(), &["x"], 2, "kmeans", &SignOracle).expect("split");
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].column("x").expect("x"), vec![-1.0, -3.0]);
        assert_eq!(clusters[1].column("x").expect("x"), vec![2.0]);
        assert_eq!(clusters[0].name(), Some("cells kmeans cluster 0"));
        assert_eq!(
            clusters[1].tag(ORIGIN_TAG),
            Some(sample().content_hash().as_str())
        );
    }

    #[test]
    fn out_of_range_assignments_are_malformed() {
        let err = cluster_split(&sample(), &["x"], 1, "kmeans", &SignOracle).expect_err("k");
        assert!(matches!(
            err,
            AggregateError::Oracle(OracleError::MalformedResult { .. })
        ));
    }

    #[test]
    fn reduced_dims_are_appended() {
        let out = add_reduced_dims(&sample(), "pca", 1, None, &SignOracle).expect("pca");
        assert_eq!(out.dims(), &["x", "y", "pca0"]);
        assert_eq!(out.column("pca0").expect("pca0"), vec![0.0, 5.0, 2.0]);
    }

    #[test]
    fn reduced_dims_keep_only_rows_the_oracle_returns() {
        let dims = vec!["x".to_owned()];
        let out = add_reduced_dims(&sample(), "isomap", 1, Some(dims.as_slice()), &SignOracle)
            .expect("isomap");
        assert_eq!(out.rows(), 2);
        assert_eq!(out.column("y").expect("y"), vec![3.0, 5.0]);
        assert_eq!(out.column("isomap0").expect("isomap0"), vec![2.0, -3.0]);
    }

    #[test]
    fn missing_oracle_propagates_without_side_effects() {
        let table = sample();
        let err = add_reduced_dims(&table, "tsne", 2, None, &NoOracle).expect_err("unavailable");
        assert_eq!(
            err.to_string(),
            "numeric oracle is unavailable for routine \"tsne\""
        );
        assert_eq!(table, sample());
    }
}
