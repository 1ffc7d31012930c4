//! Feature standardization
//!
//! Scales each feature column to zero mean and unit variance using statistics
//! fitted on the training partition only. The fitted statistics travel with
//! the model so inference applies exactly the training transform.

use crate::error::RiskError;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Per-column mean and scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl Standardizer {
    /// Fit on the rows of a feature matrix.
    ///
    /// Uses the population variance. A constant column gets a scale of 1.0 so
    /// it maps to zero rather than dividing by zero.
    pub fn fit(matrix: &Array2<f64>) -> Self {
        let width = matrix.ncols();
        let Some(means) = matrix.mean_axis(Axis(0)) else {
            return Self {
                means: vec![0.0; width],
                scales: vec![1.0; width],
            };
        };
        let scales = matrix
            .std_axis(Axis(0), 0.0)
            .mapv(|std| if std > f64::EPSILON { std } else { 1.0 });

        Self {
            means: means.to_vec(),
            scales: scales.to_vec(),
        }
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }

    /// Standardize one row
    pub fn transform(&self, values: &[f64]) -> Result<Array1<f64>, RiskError> {
        self.check_width(values.len())?;
        let row = ArrayView1::from(values);
        Ok((&row - &self.mean_view()) / &self.scale_view())
    }

    /// Standardize every row of a matrix
    pub fn transform_matrix(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, RiskError> {
        self.check_width(matrix.ncols())?;
        Ok((matrix - &self.mean_view()) / &self.scale_view())
    }

    fn mean_view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(self.means.as_slice())
    }

    fn scale_view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(self.scales.as_slice())
    }

    fn check_width(&self, actual: usize) -> Result<(), RiskError> {
        if actual == self.width() {
            Ok(())
        } else {
            Err(RiskError::VectorLength {
                expected: self.width(),
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fit_zero_mean_unit_variance() {
        let rows = array![[1.0, 10.0], [3.0, 10.0], [5.0, 10.0]];
        let scaler = Standardizer::fit(&rows);

        assert!((scaler.means[0] - 3.0).abs() < 1e-12);
        // Population std of 1, 3, 5
        assert!((scaler.scales[0] - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);

        let scaled = scaler.transform_matrix(&rows).unwrap();
        let column = scaled.column(0);
        assert!(column.mean().unwrap().abs() < 1e-12);
        assert!((column.mapv(|v| v * v).sum() / 3.0 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_column_gets_unit_scale() {
        let scaler = Standardizer::fit(&array![[4.0], [4.0]]);
        assert_eq!(scaler.scales, vec![1.0]);
        assert_eq!(scaler.transform(&[4.0]).unwrap(), array![0.0]);
        assert_eq!(scaler.transform(&[6.0]).unwrap(), array![2.0]);
    }

    #[test]
    fn test_fit_empty_is_identity() {
        let scaler = Standardizer::fit(&Array2::zeros((0, 3)));
        assert_eq!(scaler.transform(&[1.0, 2.0, 3.0]).unwrap(), array![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_width_mismatch_is_an_error() {
        let scaler = Standardizer::fit(&array![[1.0, 2.0], [3.0, 4.0]]);
        assert!(matches!(
            scaler.transform(&[1.0]),
            Err(RiskError::VectorLength {
                expected: 2,
                actual: 1
            })
        ));
        assert!(scaler.transform_matrix(&Array2::zeros((1, 3))).is_err());
    }
}
