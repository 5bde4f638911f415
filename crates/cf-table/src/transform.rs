//! Element-wise and column-wise rewrites. Each returns a new table with the
//! source's legends and a copy of its tags.

use cf_types::{Legend, Matrix};

use crate::{Table, TableError};

impl Table {
    fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        self.derive(self.data.iter().map(|value| f(*value)).collect())
    }

    /// Natural log of every cell.
    #[must_use]
    pub fn log_transform(&self) -> Self {
        self.map_values(f64::ln)
    }

    /// `asinh(value * factor)` of every cell, the usual mass-cytometry
    /// variance stabilizer.
    #[must_use]
    pub fn arcsinh_transform(&self, factor: f64) -> Self {
        self.map_values(|value| (value * factor).asinh())
    }

    /// Divides `dims` by `divider_dim`. With `min_value`, divider cells below
    /// it are raised to it first.
    pub fn ratio<S: AsRef<str>>(
        &self,
        dims: &[S],
        divider_dim: &str,
        min_value: Option<f64>,
    ) -> Result<Self, TableError> {
        let positions = self.dim_indices(dims)?;
        let divider_position = self.dim_index(divider_dim)?;
        let width = self.columns();

        let mut data = self.data.clone();
        for row in data.chunks_exact_mut(width.max(1)) {
            let mut divider = row[divider_position];
            if let Some(floor) = min_value {
                divider = divider.max(floor);
            }
            for &position in &positions {
                row[position] /= divider;
            }
        }
        Ok(self.derive(data))
    }

    /// Appends `names` as new trailing dims holding the columns of `values`.
    pub fn append_dims<S: AsRef<str>>(
        &self,
        names: &[S],
        values: &Matrix,
        legends: Option<Vec<Option<Legend>>>,
    ) -> Result<Self, TableError> {
        if values.cols() != names.len() || values.rows() != self.rows {
            return Err(TableError::ShapeMismatch {
                position: 1,
                name: "appended columns".to_owned(),
                expected: format!("{} rows x {} columns", self.rows, names.len()),
                found: format!("{} rows x {} columns", values.rows(), values.cols()),
            });
        }

        let mut dims = self.dims.clone();
        dims.extend(names.iter().map(|name| name.as_ref().to_owned()));

        let mut data = Vec::with_capacity(self.rows * dims.len());
        for (existing, extra) in self.iter_rows().zip(values.iter_rows()) {
            data.extend_from_slice(existing);
            data.extend_from_slice(extra);
        }

        let mut all_legends = self.legends.clone();
        all_legends.extend(legends.unwrap_or_else(|| vec![None; names.len()]));

        Ok(Table::new(data, dims)?
            .with_legends(all_legends)?
            .with_tags(self.tags.clone()))
    }
}

#[cfg(test)]
mod tests {
    use cf_types::Matrix;

    use crate::{Table, TableError};

    fn sample() -> Table {
        Table::from_rows(vec![vec![2.0, 4.0], vec![6.0, 0.05]], ["x", "y"])
            .expect("table")
            .with_name("t")
    }

    #[test]
    fn ratio_floors_the_divider() {
        let out = sample().ratio(&["x"], "y", Some(0.1)).expect("ratio");
        assert_eq!(out.column("x").expect("x"), vec![0.5, 60.0]);
        assert_eq!(out.column("y").expect("y"), vec![4.0, 0.05]);
        assert_eq!(out.name(), Some("t"));
    }

    #[test]
    fn log_transform_keeps_dims_and_tags() {
        let table = sample().with_tag("stim", "a");
        let out = table.log_transform();
        assert_eq!(out.dims(), table.dims());
        assert_eq!(out.tag("stim"), Some("a"));
        assert_eq!(out.value("x", 1).expect("cell"), 6.0_f64.ln());
        assert_eq!(out.value("y", 1).expect("cell"), 0.05_f64.ln());
    }

    #[test]
    fn arcsinh_applies_factor() {
        let out = sample().arcsinh_transform(0.5);
        assert_eq!(out.value("x", 0).expect("cell"), 1.0_f64.asinh());
    }

    #[test]
    fn append_dims_checks_shape() {
        let extra = Matrix::from_rows(vec![vec![7.0], vec![8.0]]).expect("matrix");
        let out = sample().append_dims(&["z"], &extra, None).expect("append");
        assert_eq!(out.dims(), &["x", "y", "z"]);
        assert_eq!(out.row(1).expect("row"), &[6.0, 0.05, 8.0]);
        assert_eq!(out.legends().len(), 3);

        let err = sample()
            .append_dims(&["z", "w"], &extra, None)
            .expect_err("shape");
        assert!(matches!(err, TableError::ShapeMismatch { .. }));
    }
}
