//! Classic test objectives with analytic gradients and Hessians
use crate::numerical::optimization::objective_model::{
    Curvature, CurvatureOperator, ObjectiveError, ObjectiveFunction, ObjectiveModel,
};
use nalgebra::{DMatrix, DVector, dmatrix, dvector};
use std::sync::Arc;

/// f(x, y) = (a - x)^2 + b (y - x^2)^2, minimum at (a, a^2)
#[derive(Debug, Clone)]
pub struct Rosenbrock {
    pub a: f64,
    pub b: f64,
    /// report curvature as a Hessian-vector product instead of a matrix
    pub matrix_free: bool,
}

impl Default for Rosenbrock {
    fn default() -> Self {
        Rosenbrock {
            a: 1.0,
            b: 100.0,
            matrix_free: false,
        }
    }
}

impl Rosenbrock {
    pub fn matrix_free() -> Self {
        Rosenbrock {
            matrix_free: true,
            ..Default::default()
        }
    }

    fn value_at(&self, x: f64, y: f64) -> f64 {
        (self.a - x).powi(2) + self.b * (y - x * x).powi(2)
    }

    fn check_dimension(point: &DVector<f64>) -> Result<(), ObjectiveError> {
        if point.len() != 2 {
            return Err(ObjectiveError::DimensionMismatch {
                expected: 2,
                found: point.len(),
            });
        }
        Ok(())
    }

    fn hessian_at(&self, x: f64, y: f64) -> DMatrix<f64> {
        let b = self.b;
        dmatrix![
            2.0 - 4.0 * b * (y - x * x) + 8.0 * b * x * x, -4.0 * b * x;
            -4.0 * b * x, 2.0 * b
        ]
    }
}

impl ObjectiveFunction for Rosenbrock {
    fn dimension(&self) -> usize {
        2
    }

    fn evaluate(&self, point: &DVector<f64>) -> Result<ObjectiveModel, ObjectiveError> {
        Self::check_dimension(point)?;
        let (x, y) = (point[0], point[1]);
        let value = self.value_at(x, y);
        let gradient = dvector![
            -2.0 * (self.a - x) - 4.0 * self.b * x * (y - x * x),
            2.0 * self.b * (y - x * x)
        ];
        let hessian = self.hessian_at(x, y);
        let curvature = if self.matrix_free {
            let op: CurvatureOperator = Arc::new(move |v: &DVector<f64>| &hessian * v);
            Curvature::Operator(op)
        } else {
            Curvature::Dense(hessian)
        };
        ObjectiveModel::new(point.clone(), value, gradient, curvature)
    }

    fn value(&self, point: &DVector<f64>) -> Result<f64, ObjectiveError> {
        Self::check_dimension(point)?;
        let value = self.value_at(point[0], point[1]);
        if !value.is_finite() {
            return Err(ObjectiveError::NonFiniteValue { value });
        }
        Ok(value)
    }
}

/// f(x) = 0.5 x^T A x - b^T x with symmetric A, minimum solves A x = b when A > 0
#[derive(Debug, Clone)]
pub struct QuadraticForm {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
}

impl QuadraticForm {
    pub fn new(a: DMatrix<f64>, b: DVector<f64>) -> Result<Self, ObjectiveError> {
        if a.nrows() != a.ncols() || a.nrows() != b.len() {
            return Err(ObjectiveError::DimensionMismatch {
                expected: b.len(),
                found: a.nrows(),
            });
        }
        Ok(QuadraticForm { a, b })
    }
}

impl ObjectiveFunction for QuadraticForm {
    fn dimension(&self) -> usize {
        self.b.len()
    }

    fn evaluate(&self, point: &DVector<f64>) -> Result<ObjectiveModel, ObjectiveError> {
        if point.len() != self.b.len() {
            return Err(ObjectiveError::DimensionMismatch {
                expected: self.b.len(),
                found: point.len(),
            });
        }
        let ax = &self.a * point;
        let value = 0.5 * point.dot(&ax) - self.b.dot(point);
        ObjectiveModel::new(
            point.clone(),
            value,
            ax - &self.b,
            Curvature::Dense(self.a.clone()),
        )
    }
}
