use std::io::Write;

use aprender::preprocessing::PCA;
use aprender::primitives::Matrix;
use aprender::traits::Transformer;
use aprender::AprenderError;

use crate::error::{OptimizerError, Result};
use crate::report::GroupAggregatedTable;

/// A 2-D embedding of the rows of a matrix.
pub trait Projector {
    fn name(&self) -> &'static str;

    fn project(&self, matrix: &[Vec<f64>], seed: Option<u64>) -> Result<Vec<[f64; 2]>>;
}

pub(crate) fn check_matrix(method: &'static str, matrix: &[Vec<f64>], min_rows: usize) -> Result<()> {
    if matrix.len() < min_rows {
        return Err(OptimizerError::Projection {
            method,
            reason: format!("needs at least {} rows, got {}", min_rows, matrix.len()),
        });
    }
    let width = matrix.first().map_or(0, |row| row.len());
    if matrix.iter().any(|row| row.len() != width) {
        return Err(OptimizerError::Projection {
            method,
            reason: "rows differ in width".to_string(),
        });
    }
    if matrix.iter().flatten().any(|value| !value.is_finite()) {
        return Err(OptimizerError::Projection {
            method,
            reason: "matrix contains non-finite values".to_string(),
        });
    }
    Ok(())
}

pub(crate) fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub(crate) fn to_matrix(method: &'static str, matrix: &[Vec<f64>]) -> Result<Matrix<f32>> {
    let width = matrix.first().map_or(0, |row| row.len());
    let data = matrix.iter().flatten().map(|value| *value as f32).collect();
    Matrix::from_vec(matrix.len(), width, data).map_err(|reason| OptimizerError::Projection {
        method,
        reason: reason.to_string(),
    })
}

/// First two columns of an estimator output; a missing second column is zero.
pub(crate) fn from_matrix(embedding: &Matrix<f32>) -> Vec<[f64; 2]> {
    let (rows, cols) = embedding.shape();
    (0..rows)
        .map(|i| {
            let x = if cols > 0 { embedding.get(i, 0) as f64 } else { 0.0 };
            let y = if cols > 1 { embedding.get(i, 1) as f64 } else { 0.0 };
            [x, y]
        })
        .collect()
}

pub(crate) fn estimator_failed(method: &'static str) -> impl Fn(AprenderError) -> OptimizerError {
    move |err| OptimizerError::Projection {
        method,
        reason: err.to_string(),
    }
}

/// First two principal component scores. Each axis is sign-normalised so
/// its largest score is positive.
pub(crate) fn pca_2d(matrix: &[Vec<f64>]) -> Result<Vec<[f64; 2]>> {
    let width = matrix.first().map_or(0, |row| row.len());
    if matrix.len() < 2 || width == 0 {
        return Ok(vec![[0.0, 0.0]; matrix.len()]);
    }

    let scores = PCA::new(2.min(width))
        .fit_transform(&to_matrix("pca", matrix)?)
        .map_err(estimator_failed("pca"))?;
    let mut points = from_matrix(&scores);
    for axis in 0..2 {
        let pivot = points
            .iter()
            .map(|p| p[axis])
            .fold(0.0f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
        if pivot < 0.0 {
            points.iter_mut().for_each(|p| p[axis] = -p[axis]);
        }
    }
    Ok(points)
}

/// Projected coordinates per group.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionTable {
    pub column: String,
    pub index: Vec<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl ProjectionTable {
    pub fn project(aggregated: &GroupAggregatedTable, projector: &dyn Projector, seed: Option<u64>) -> Result<Self> {
        let coordinates = projector.project(&aggregated.rows, seed)?;
        let name = projector.name();
        Ok(ProjectionTable {
            column: aggregated.column.clone(),
            index: aggregated.index.clone(),
            headers: vec![format!("{name}_x"), format!("{name}_y")],
            rows: coordinates.into_iter().map(|[x, y]| vec![x, y]).collect(),
        })
    }

    /// Puts the columns of `other` next to these. Both must share the index.
    pub fn join(mut self, other: ProjectionTable) -> Result<Self> {
        if self.index != other.index {
            return Err(OptimizerError::Projection {
                method: "join",
                reason: format!("indexes differ ({} vs {} groups)", self.index.len(), other.index.len()),
            });
        }
        self.headers.extend(other.headers);
        for (row, extra) in self.rows.iter_mut().zip(other.rows) {
            row.extend(extra);
        }
        Ok(self)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec![self.column.clone()];
        header.extend(self.headers.iter().cloned());
        wtr.write_record(&header)?;
        for (group, values) in self.index.iter().zip(&self.rows) {
            let mut record = vec![group.clone()];
            record.extend(values.iter().map(|v| v.to_string()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    struct Diagonal;

    impl Projector for Diagonal {
        fn name(&self) -> &'static str {
            "diag"
        }

        fn project(&self, matrix: &[Vec<f64>], _seed: Option<u64>) -> Result<Vec<[f64; 2]>> {
            Ok(matrix.iter().map(|row| [row[0], row[0]]).collect())
        }
    }

    fn aggregated(groups: &[&str]) -> GroupAggregatedTable {
        GroupAggregatedTable {
            column: "country".to_string(),
            index: groups.iter().map(|g| g.to_string()).collect(),
            headers: vec!["0".to_string()],
            rows: (0..groups.len()).map(|i| vec![i as f64]).collect(),
            dropped: vec![],
        }
    }

    #[test]
    fn projections_join_side_by_side() {
        let groups = aggregated(&["Poland", "Spain"]);
        let first = ProjectionTable::project(&groups, &Diagonal, None).unwrap();
        let second = ProjectionTable::project(&groups, &Diagonal, None).unwrap();
        let joined = first.join(second).unwrap();
        assert_eq!(joined.headers, vec!["diag_x", "diag_y", "diag_x", "diag_y"]);
        assert_eq!(joined.rows[1], vec![1.0, 1.0, 1.0, 1.0]);

        let mut out = Vec::new();
        joined.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("country,diag_x,diag_y,diag_x,diag_y\nPoland,0,0,0,0\n"));
    }

    #[test]
    fn join_requires_the_same_groups() {
        let first = ProjectionTable::project(&aggregated(&["Poland", "Spain"]), &Diagonal, None).unwrap();
        let second = ProjectionTable::project(&aggregated(&["Poland"]), &Diagonal, None).unwrap();
        assert!(matches!(first.join(second), Err(OptimizerError::Projection { method: "join", .. })));
    }

    #[test]
    fn pca_recovers_the_main_axis() {
        let xs = [0.0, 1.0, 2.0, 3.0, 10.0];
        let matrix: Vec<Vec<f64>> = xs.iter().map(|x| vec![*x, 2.0 * x, 1.0]).collect();
        let scores = pca_2d(&matrix).unwrap();
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let spread = 5f64.sqrt();
        for (x, [first, second]) in xs.iter().zip(&scores) {
            assert_abs_diff_eq!(*first, (x - mean) * spread, epsilon = 1e-3);
            assert_abs_diff_eq!(*second, 0.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn estimator_output_keeps_row_order() {
        let matrix = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let points = from_matrix(&to_matrix("test", &matrix).unwrap());
        assert_eq!(points, vec![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
    }

    #[test]
    fn malformed_matrices_are_rejected() {
        assert!(check_matrix("test", &[vec![1.0]], 2).is_err());
        assert!(check_matrix("test", &[vec![1.0], vec![1.0, 2.0]], 2).is_err());
        assert!(check_matrix("test", &[vec![f64::NAN], vec![1.0]], 2).is_err());
        assert!(check_matrix("test", &[vec![0.0], vec![1.0]], 2).is_ok());
    }
}
