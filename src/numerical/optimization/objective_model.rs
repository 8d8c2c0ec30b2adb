//! Objective model consumed by the trust region solvers.
//!
//! An [`ObjectiveFunction`] is the caller-supplied capability: it maps a point
//! to an [`ObjectiveModel`], an immutable snapshot holding the value, gradient
//! and curvature at that point. The control loop passes snapshots around by
//! value, so gradient and curvature can never go stale with respect to the point.
use nalgebra::{DMatrix, DVector};
use std::fmt;
use std::sync::Arc;

/// Hessian-vector product closure
pub type CurvatureOperator = Arc<dyn Fn(&DVector<f64>) -> DVector<f64> + Send + Sync>;

/// Curvature of the local quadratic model
#[derive(Clone)]
pub enum Curvature {
    /// dense symmetric Hessian (exact or approximate)
    Dense(DMatrix<f64>),
    /// Jacobian J of a residual vector; the curvature is J^T*J
    GaussNewton(DMatrix<f64>),
    /// only products B*v are available
    Operator(CurvatureOperator),
}

impl fmt::Debug for Curvature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Curvature::Dense(m) => write!(f, "Dense({}x{})", m.nrows(), m.ncols()),
            Curvature::GaussNewton(j) => write!(f, "GaussNewton({}x{})", j.nrows(), j.ncols()),
            Curvature::Operator(_) => write!(f, "Operator"),
        }
    }
}

impl Curvature {
    /// B*v
    pub fn product(&self, v: &DVector<f64>) -> DVector<f64> {
        match self {
            Curvature::Dense(b) => b * v,
            Curvature::GaussNewton(j) => j.tr_mul(&(j * v)),
            Curvature::Operator(op) => op(v),
        }
    }

    /// v^T*B*v
    pub fn quadratic_form(&self, v: &DVector<f64>) -> f64 {
        match self {
            // ||Jv||^2 avoids forming J^T*J
            Curvature::GaussNewton(j) => (j * v).norm_squared(),
            _ => v.dot(&self.product(v)),
        }
    }

    /// Dense n x n matrix of the curvature. For an operator the matrix is
    /// assembled column by column from products with unit vectors.
    pub fn matrix(&self, n: usize) -> DMatrix<f64> {
        match self {
            Curvature::Dense(b) => b.clone(),
            Curvature::GaussNewton(j) => j.tr_mul(j),
            Curvature::Operator(op) => {
                let mut b = DMatrix::zeros(n, n);
                let mut e = DVector::zeros(n);
                for k in 0..n {
                    e[k] = 1.0;
                    b.set_column(k, &op(&e));
                    e[k] = 0.0;
                }
                // symmetrize: the operator may be slightly asymmetric numerically
                (&b + b.transpose()) * 0.5
            }
        }
    }

    fn is_finite(&self) -> bool {
        match self {
            Curvature::Dense(m) | Curvature::GaussNewton(m) => m.iter().all(|x| x.is_finite()),
            Curvature::Operator(_) => true,
        }
    }

    fn fits(&self, n: usize) -> bool {
        match self {
            Curvature::Dense(m) => m.nrows() == n && m.ncols() == n,
            Curvature::GaussNewton(j) => j.ncols() == n,
            Curvature::Operator(_) => true,
        }
    }
}

/// Errors raised while evaluating an objective
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectiveError {
    /// objective value is NaN or infinite
    NonFiniteValue { value: f64 },
    /// gradient contains NaN or infinity
    NonFiniteGradient,
    /// curvature contains NaN or infinity
    NonFiniteCurvature,
    /// returned vectors/matrices do not match the problem dimension
    DimensionMismatch { expected: usize, found: usize },
    /// user code could not evaluate the objective at the point
    EvaluationFailed(String),
}

impl fmt::Display for ObjectiveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectiveError::NonFiniteValue { value } => {
                write!(f, "objective value is not finite: {}", value)
            }
            ObjectiveError::NonFiniteGradient => write!(f, "gradient is not finite"),
            ObjectiveError::NonFiniteCurvature => write!(f, "curvature is not finite"),
            ObjectiveError::DimensionMismatch { expected, found } => write!(
                f,
                "dimension mismatch: expected {}, found {}",
                expected, found
            ),
            ObjectiveError::EvaluationFailed(msg) => write!(f, "evaluation failed: {}", msg),
        }
    }
}

impl std::error::Error for ObjectiveError {}

/// Snapshot of the objective and its local quadratic model at one point
#[derive(Debug, Clone)]
pub struct ObjectiveModel {
    point: DVector<f64>,
    value: f64,
    gradient: DVector<f64>,
    curvature: Curvature,
}

impl ObjectiveModel {
    /// Build a snapshot, checking dimensions and finiteness.
    pub fn new(
        point: DVector<f64>,
        value: f64,
        gradient: DVector<f64>,
        curvature: Curvature,
    ) -> Result<Self, ObjectiveError> {
        let n = point.len();
        if gradient.len() != n {
            return Err(ObjectiveError::DimensionMismatch {
                expected: n,
                found: gradient.len(),
            });
        }
        if !curvature.fits(n) {
            let found = match &curvature {
                Curvature::Dense(m) => m.nrows(),
                Curvature::GaussNewton(j) => j.ncols(),
                Curvature::Operator(_) => n,
            };
            return Err(ObjectiveError::DimensionMismatch { expected: n, found });
        }
        if !value.is_finite() {
            return Err(ObjectiveError::NonFiniteValue { value });
        }
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(ObjectiveError::NonFiniteGradient);
        }
        if !curvature.is_finite() {
            return Err(ObjectiveError::NonFiniteCurvature);
        }
        Ok(ObjectiveModel {
            point,
            value,
            gradient,
            curvature,
        })
    }

    /// Evaluate `function` at `point`
    pub fn evaluate_at<F: ObjectiveFunction + ?Sized>(
        function: &F,
        point: &DVector<f64>,
    ) -> Result<Self, ObjectiveError> {
        let n = function.dimension();
        if point.len() != n {
            return Err(ObjectiveError::DimensionMismatch {
                expected: n,
                found: point.len(),
            });
        }
        function.evaluate(point)
    }

    pub fn point(&self) -> &DVector<f64> {
        &self.point
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn gradient(&self) -> &DVector<f64> {
        &self.gradient
    }

    pub fn curvature(&self) -> &Curvature {
        &self.curvature
    }

    pub fn dimension(&self) -> usize {
        self.point.len()
    }

    pub fn gradient_norm(&self) -> f64 {
        self.gradient.norm()
    }

    /// ||g||_inf
    pub fn gradient_max_norm(&self) -> f64 {
        self.gradient.amax()
    }

    pub fn curvature_product(&self, v: &DVector<f64>) -> DVector<f64> {
        self.curvature.product(v)
    }

    pub fn curvature_matrix(&self) -> DMatrix<f64> {
        self.curvature.matrix(self.dimension())
    }

    /// Change of the quadratic model m(s) - m(0) = g^T*s + 0.5*s^T*B*s
    pub fn model_change(&self, step: &DVector<f64>) -> f64 {
        self.gradient.dot(step) + 0.5 * self.curvature.quadratic_form(step)
    }

    /// Reduction predicted by the quadratic model: -(g^T*s + 0.5*s^T*B*s)
    pub fn predicted_reduction(&self, step: &DVector<f64>) -> f64 {
        -self.model_change(step)
    }
}

/// Capability interface of an objective f: R^n -> R.
pub trait ObjectiveFunction {
    /// number of unknowns
    fn dimension(&self) -> usize;

    /// value, gradient and curvature at `point`
    fn evaluate(&self, point: &DVector<f64>) -> Result<ObjectiveModel, ObjectiveError>;

    /// Value only. Override when the value is much cheaper than the full model.
    fn value(&self, point: &DVector<f64>) -> Result<f64, ObjectiveError> {
        Ok(self.evaluate(point)?.value())
    }
}

impl<F: ObjectiveFunction + ?Sized> ObjectiveFunction for &F {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }
    fn evaluate(&self, point: &DVector<f64>) -> Result<ObjectiveModel, ObjectiveError> {
        (**self).evaluate(point)
    }
    fn value(&self, point: &DVector<f64>) -> Result<f64, ObjectiveError> {
        (**self).value(point)
    }
}

/// Objective assembled from closures: value, gradient and dense Hessian.
pub struct ClosureObjective<V, G, H>
where
    V: Fn(&DVector<f64>) -> f64,
    G: Fn(&DVector<f64>) -> DVector<f64>,
    H: Fn(&DVector<f64>) -> DMatrix<f64>,
{
    dimension: usize,
    value: V,
    gradient: G,
    hessian: H,
}

impl<V, G, H> ClosureObjective<V, G, H>
where
    V: Fn(&DVector<f64>) -> f64,
    G: Fn(&DVector<f64>) -> DVector<f64>,
    H: Fn(&DVector<f64>) -> DMatrix<f64>,
{
    pub fn new(dimension: usize, value: V, gradient: G, hessian: H) -> Self {
        ClosureObjective {
            dimension,
            value,
            gradient,
            hessian,
        }
    }
}

impl<V, G, H> ObjectiveFunction for ClosureObjective<V, G, H>
where
    V: Fn(&DVector<f64>) -> f64,
    G: Fn(&DVector<f64>) -> DVector<f64>,
    H: Fn(&DVector<f64>) -> DMatrix<f64>,
{
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn evaluate(&self, point: &DVector<f64>) -> Result<ObjectiveModel, ObjectiveError> {
        ObjectiveModel::new(
            point.clone(),
            (self.value)(point),
            (self.gradient)(point),
            Curvature::Dense((self.hessian)(point)),
        )
    }

    fn value(&self, point: &DVector<f64>) -> Result<f64, ObjectiveError> {
        let value = (self.value)(point);
        if !value.is_finite() {
            return Err(ObjectiveError::NonFiniteValue { value });
        }
        Ok(value)
    }
}
