//! Nonlinear least squares as a trust region objective.
//!
//! f(p) = 0.5 * sum_i w_i r_i(p)^2,  gradient J^T W r,  curvature J^T W J (Gauss-Newton).
//! The Jacobian is analytic when the problem provides one, otherwise it is
//! approximated by finite differences.
use crate::numerical::optimization::objective_model::{
    Curvature, ObjectiveError, ObjectiveFunction, ObjectiveModel,
};
use nalgebra::{DMatrix, DVector};
use strum_macros::{Display, EnumString};

/// Residual vector r(p) of a least squares problem
pub trait LeastSquaresProblem {
    /// Get number of parameters
    fn num_parameters(&self) -> usize;

    /// Get number of residuals
    fn num_residuals(&self) -> usize;

    /// Evaluate residuals at given parameters
    fn residuals(&self, params: &DVector<f64>) -> Result<DVector<f64>, ObjectiveError>;

    /// Analytic Jacobian dr/dp, `None` if unavailable
    fn jacobian(&self, _params: &DVector<f64>) -> Option<DMatrix<f64>> {
        None
    }
}

/// Finite difference scheme for Jacobians
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum FiniteDifference {
    #[default]
    #[strum(to_string = "forward")]
    Forward,
    #[strum(to_string = "backward")]
    Backward,
    #[strum(to_string = "central")]
    Central,
}

impl FiniteDifference {
    /// relative step: sqrt(eps) for one-sided, eps^(1/3) for central differences
    pub fn relative_step(&self) -> f64 {
        match self {
            FiniteDifference::Forward | FiniteDifference::Backward => f64::EPSILON.sqrt(),
            FiniteDifference::Central => f64::EPSILON.cbrt(),
        }
    }

    /// Jacobian of `f` at `params` column by column, with step h*max(1, |p_j|).
    /// `f0` is f(params), reused by the one-sided schemes.
    pub fn jacobian<F>(
        &self,
        f: F,
        params: &DVector<f64>,
        f0: &DVector<f64>,
    ) -> Result<DMatrix<f64>, ObjectiveError>
    where
        F: Fn(&DVector<f64>) -> Result<DVector<f64>, ObjectiveError>,
    {
        let n = params.len();
        let m = f0.len();
        let h = self.relative_step();
        let mut jac = DMatrix::zeros(m, n);
        let mut shifted = params.clone();
        for j in 0..n {
            let step = h * params[j].abs().max(1.0);
            let column = match self {
                FiniteDifference::Forward => {
                    shifted[j] = params[j] + step;
                    (f(&shifted)? - f0) / step
                }
                FiniteDifference::Backward => {
                    shifted[j] = params[j] - step;
                    (f0 - f(&shifted)?) / step
                }
                FiniteDifference::Central => {
                    shifted[j] = params[j] + step;
                    let plus = f(&shifted)?;
                    shifted[j] = params[j] - step;
                    let minus = f(&shifted)?;
                    (plus - minus) / (2.0 * step)
                }
            };
            shifted[j] = params[j];
            if column.len() != m {
                return Err(ObjectiveError::DimensionMismatch {
                    expected: m,
                    found: column.len(),
                });
            }
            jac.set_column(j, &column);
        }
        Ok(jac)
    }
}

/// Adapter turning a `LeastSquaresProblem` into an `ObjectiveFunction`
#[derive(Debug, Clone)]
pub struct LeastSquaresObjective<P: LeastSquaresProblem> {
    problem: P,
    weights: Option<DVector<f64>>,
    difference: FiniteDifference,
}

impl<P: LeastSquaresProblem> LeastSquaresObjective<P> {
    pub fn new(problem: P) -> Self {
        LeastSquaresObjective {
            problem,
            weights: None,
            difference: FiniteDifference::default(),
        }
    }

    /// Observation weights w_i, one per residual, finite and non-negative
    pub fn with_weights(mut self, weights: DVector<f64>) -> Result<Self, ObjectiveError> {
        if weights.len() != self.problem.num_residuals() {
            return Err(ObjectiveError::DimensionMismatch {
                expected: self.problem.num_residuals(),
                found: weights.len(),
            });
        }
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(ObjectiveError::EvaluationFailed(
                "weights must be finite and non-negative".to_string(),
            ));
        }
        self.weights = Some(weights);
        Ok(self)
    }

    pub fn with_finite_difference(mut self, difference: FiniteDifference) -> Self {
        self.difference = difference;
        self
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    pub fn weights(&self) -> Option<&DVector<f64>> {
        self.weights.as_ref()
    }

    fn checked_residuals(&self, params: &DVector<f64>) -> Result<DVector<f64>, ObjectiveError> {
        let r = self.problem.residuals(params)?;
        let m = self.problem.num_residuals();
        if r.len() != m {
            return Err(ObjectiveError::DimensionMismatch {
                expected: m,
                found: r.len(),
            });
        }
        if r.iter().any(|x| !x.is_finite()) {
            return Err(ObjectiveError::NonFiniteValue {
                value: r.norm_squared(),
            });
        }
        Ok(r)
    }

    /// Unweighted residuals and Jacobian at `params`
    pub fn residuals_and_jacobian(
        &self,
        params: &DVector<f64>,
    ) -> Result<(DVector<f64>, DMatrix<f64>), ObjectiveError> {
        let r = self.checked_residuals(params)?;
        let jac = match self.problem.jacobian(params) {
            Some(jac) => jac,
            None => self
                .difference
                .jacobian(|p| self.problem.residuals(p), params, &r)?,
        };
        if jac.nrows() != r.len() || jac.ncols() != params.len() {
            return Err(ObjectiveError::DimensionMismatch {
                expected: params.len(),
                found: jac.ncols(),
            });
        }
        if jac.iter().any(|x| !x.is_finite()) {
            return Err(ObjectiveError::NonFiniteGradient);
        }
        Ok((r, jac))
    }

    /// sqrt(W)*r and sqrt(W)*J
    pub(crate) fn weighted(&self, r: DVector<f64>, mut jac: DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
        match &self.weights {
            None => (r, jac),
            Some(w) => {
                let sqrt_w = w.map(f64::sqrt);
                for (i, mut row) in jac.row_iter_mut().enumerate() {
                    row *= sqrt_w[i];
                }
                (r.component_mul(&sqrt_w), jac)
            }
        }
    }

    /// Weighted residual sum of squares sum_i w_i r_i^2
    pub fn weighted_sum_of_squares(&self, r: &DVector<f64>) -> f64 {
        match &self.weights {
            None => r.norm_squared(),
            Some(w) => r.iter().zip(w.iter()).map(|(ri, wi)| wi * ri * ri).sum(),
        }
    }
}

impl<P: LeastSquaresProblem> ObjectiveFunction for LeastSquaresObjective<P> {
    fn dimension(&self) -> usize {
        self.problem.num_parameters()
    }

    fn evaluate(&self, params: &DVector<f64>) -> Result<ObjectiveModel, ObjectiveError> {
        let (r, jac) = self.residuals_and_jacobian(params)?;
        let (rw, jw) = self.weighted(r, jac);
        let value = 0.5 * rw.norm_squared();
        let gradient = jw.tr_mul(&rw);
        ObjectiveModel::new(params.clone(), value, gradient, Curvature::GaussNewton(jw))
    }

    fn value(&self, params: &DVector<f64>) -> Result<f64, ObjectiveError> {
        let r = self.checked_residuals(params)?;
        Ok(0.5 * self.weighted_sum_of_squares(&r))
    }
}

pub type ModelFunction = Box<dyn Fn(f64, &DVector<f64>) -> f64 + Send + Sync>;
pub type ModelGradient = Box<dyn Fn(f64, &DVector<f64>) -> DVector<f64> + Send + Sync>;

/// Fit of y = f(x; p) to observed points, residual r_i = f(x_i; p) - y_i
pub struct CurveFit {
    x: DVector<f64>,
    y: DVector<f64>,
    num_parameters: usize,
    model: ModelFunction,
    gradient: Option<ModelGradient>,
}

impl CurveFit {
    pub fn new(
        x: DVector<f64>,
        y: DVector<f64>,
        num_parameters: usize,
        model: ModelFunction,
    ) -> Result<Self, ObjectiveError> {
        if x.len() != y.len() {
            return Err(ObjectiveError::DimensionMismatch {
                expected: x.len(),
                found: y.len(),
            });
        }
        Ok(CurveFit {
            x,
            y,
            num_parameters,
            model,
            gradient: None,
        })
    }

    /// analytic gradient of the model with respect to the parameters
    pub fn with_gradient(mut self, gradient: ModelGradient) -> Self {
        self.gradient = Some(gradient);
        self
    }

    pub fn observations(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.x, &self.y)
    }

    /// model values at the observation points
    pub fn predict(&self, params: &DVector<f64>) -> DVector<f64> {
        self.x.map(|xi| (self.model)(xi, params))
    }
}

impl LeastSquaresProblem for CurveFit {
    fn num_parameters(&self) -> usize {
        self.num_parameters
    }

    fn num_residuals(&self) -> usize {
        self.x.len()
    }

    fn residuals(&self, params: &DVector<f64>) -> Result<DVector<f64>, ObjectiveError> {
        if params.len() != self.num_parameters {
            return Err(ObjectiveError::DimensionMismatch {
                expected: self.num_parameters,
                found: params.len(),
            });
        }
        Ok(self.predict(params) - &self.y)
    }

    fn jacobian(&self, params: &DVector<f64>) -> Option<DMatrix<f64>> {
        let gradient = self.gradient.as_ref()?;
        let mut jac = DMatrix::zeros(self.x.len(), self.num_parameters);
        for (i, xi) in self.x.iter().enumerate() {
            let row = gradient(*xi, params);
            if row.len() != self.num_parameters {
                return None;
            }
            jac.set_row(i, &row.transpose());
        }
        Some(jac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};
    use std::str::FromStr;

    fn exp_decay() -> CurveFit {
        let x = DVector::from_iterator(10, (0..10).map(|i| i as f64 * 0.5));
        let y = x.map(|xi| 2.0 * (-0.7 * xi).exp());
        CurveFit::new(x, y, 2, Box::new(|x: f64, p: &DVector<f64>| p[0] * (-p[1] * x).exp())).unwrap()
    }

    fn exp_gradient() -> ModelGradient {
        Box::new(|x: f64, p: &DVector<f64>| dvector![(-p[1] * x).exp(), -p[0] * x * (-p[1] * x).exp()])
    }

    #[test]
    fn test_finite_difference_schemes() {
        let f = |p: &DVector<f64>| -> Result<DVector<f64>, ObjectiveError> {
            Ok(dvector![p[0] * p[0] + p[1], (p[0] * p[1]).sin()])
        };
        let p: DVector<f64> = dvector![0.7, -1.3];
        let exact = dmatrix![
            2.0 * p[0], 1.0;
            p[1] * (p[0] * p[1]).cos(), p[0] * (p[0] * p[1]).cos()
        ];
        let f0 = f(&p).unwrap();
        for (scheme, tol) in [
            (FiniteDifference::Forward, 1e-6),
            (FiniteDifference::Backward, 1e-6),
            (FiniteDifference::Central, 1e-9),
        ] {
            let jac = scheme.jacobian(f, &p, &f0).unwrap();
            assert_relative_eq!(jac, exact.clone(), epsilon = tol);
        }
        assert_eq!(
            FiniteDifference::from_str("central").unwrap(),
            FiniteDifference::Central
        );
    }

    #[test]
    fn test_analytic_and_numeric_jacobian_agree() {
        let p: DVector<f64> = dvector![1.5, 0.4];
        let numeric = LeastSquaresObjective::new(exp_decay())
            .with_finite_difference(FiniteDifference::Central);
        let analytic = LeastSquaresObjective::new(exp_decay().with_gradient(exp_gradient()));
        let (_, jn) = numeric.residuals_and_jacobian(&p).unwrap();
        let (_, ja) = analytic.residuals_and_jacobian(&p).unwrap();
        assert_relative_eq!(jn, ja, epsilon = 1e-8);
    }

    #[test]
    fn test_objective_value_gradient() {
        let objective = LeastSquaresObjective::new(exp_decay().with_gradient(exp_gradient()));
        let p: DVector<f64> = dvector![1.0, 1.0];
        let model = objective.evaluate(&p).unwrap();
        let (r, jac) = objective.residuals_and_jacobian(&p).unwrap();
        assert_relative_eq!(model.value(), 0.5 * r.norm_squared(), epsilon = 1e-14);
        assert_relative_eq!(model.gradient().clone(), jac.tr_mul(&r), epsilon = 1e-14);
        assert_relative_eq!(objective.value(&p).unwrap(), model.value(), epsilon = 1e-14);
        // exact parameters give zero residual
        assert_relative_eq!(objective.value(&dvector![2.0, 0.7]).unwrap(), 0.0, epsilon = 1e-24);
    }

    #[test]
    fn test_weights() {
        let fit = exp_decay();
        let w = DVector::from_element(10, 4.0);
        let p: DVector<f64> = dvector![1.0, 1.0];
        let plain = LeastSquaresObjective::new(exp_decay()).evaluate(&p).unwrap();
        let weighted = LeastSquaresObjective::new(fit).with_weights(w).unwrap();
        let model = weighted.evaluate(&p).unwrap();
        assert_relative_eq!(model.value(), 4.0 * plain.value(), epsilon = 1e-12);
        assert_relative_eq!(weighted.value(&p).unwrap(), model.value(), epsilon = 1e-12);
        assert_relative_eq!(
            model.gradient().clone(),
            plain.gradient() * 4.0,
            epsilon = 1e-6
        );

        let bad = LeastSquaresObjective::new(exp_decay()).with_weights(DVector::from_element(10, -1.0));
        assert!(bad.is_err());
        let short = LeastSquaresObjective::new(exp_decay()).with_weights(DVector::from_element(3, 1.0));
        assert!(matches!(short, Err(ObjectiveError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_curve_fit_length_mismatch() {
        let res = CurveFit::new(dvector![1.0, 2.0], dvector![1.0], 1, Box::new(|x: f64, p: &DVector<f64>| p[0] * x));
        assert!(res.is_err());
    }
}
