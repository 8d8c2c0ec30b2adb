//! Goodness of fit and parameter uncertainties at a least squares minimum
use crate::numerical::optimization::least_squares::{LeastSquaresObjective, LeastSquaresProblem};
use crate::numerical::optimization::objective_model::ObjectiveError;
use crate::somelinalg::symmetric_solve::invert_symmetric_positive_definite;
use log::warn;
use nalgebra::{DMatrix, DVector};
use tabled::{builder::Builder, settings::Style};

/// reciprocal condition below which J^T W J is treated as singular
const COVARIANCE_RCOND: f64 = 1e-14;

#[derive(Debug, Clone)]
pub struct FitStatistics {
    /// number of residuals minus number of parameters
    pub degrees_of_freedom: usize,
    /// weighted residual sum of squares
    pub residual_sum_of_squares: f64,
    /// RSS / dof
    pub reduced_chi_square: Option<f64>,
    /// (J^T W J)^-1 * RSS / dof
    pub covariance: Option<DMatrix<f64>>,
    pub standard_errors: Option<DVector<f64>>,
    pub correlation: Option<DMatrix<f64>>,
}

impl FitStatistics {
    /// Statistics of `objective` at the fitted `params`.
    /// Uncertainties are `None` when dof = 0 or J^T W J is singular.
    pub fn compute<P: LeastSquaresProblem>(
        objective: &LeastSquaresObjective<P>,
        params: &DVector<f64>,
    ) -> Result<Self, ObjectiveError> {
        let (r, jac) = objective.residuals_and_jacobian(params)?;
        let rss = objective.weighted_sum_of_squares(&r);
        let (_, jw) = objective.weighted(r, jac);
        let m = jw.nrows();
        let n = jw.ncols();
        let dof = m.saturating_sub(n);
        if dof == 0 {
            return Ok(FitStatistics {
                degrees_of_freedom: 0,
                residual_sum_of_squares: rss,
                reduced_chi_square: None,
                covariance: None,
                standard_errors: None,
                correlation: None,
            });
        }
        let reduced = rss / dof as f64;
        let normal_matrix = jw.tr_mul(&jw);
        let covariance = match invert_symmetric_positive_definite(&normal_matrix, COVARIANCE_RCOND) {
            Ok(inverse) => Some(inverse * reduced),
            Err(e) => {
                warn!("parameter covariance unavailable: {}", e);
                None
            }
        };
        let standard_errors = covariance
            .as_ref()
            .map(|c| DVector::from_iterator(n, (0..n).map(|i| c[(i, i)].max(0.0).sqrt())));
        let correlation = match (&covariance, &standard_errors) {
            (Some(c), Some(se)) if se.iter().all(|s| *s > 0.0) => {
                Some(DMatrix::from_fn(n, n, |i, j| c[(i, j)] / (se[i] * se[j])))
            }
            _ => None,
        };
        Ok(FitStatistics {
            degrees_of_freedom: dof,
            residual_sum_of_squares: rss,
            reduced_chi_square: Some(reduced),
            covariance,
            standard_errors,
            correlation,
        })
    }

    /// Table of parameter values with their standard errors
    pub fn parameter_table(&self, params: &DVector<f64>) -> String {
        let mut rows = vec![vec![
            "parameter".to_string(),
            "value".to_string(),
            "std. error".to_string(),
        ]];
        for (i, p) in params.iter().enumerate() {
            let se = self
                .standard_errors
                .as_ref()
                .map(|s| format!("{:.6e}", s[i]))
                .unwrap_or_else(|| "-".to_string());
            rows.push(vec![format!("p{}", i), format!("{:.8e}", p), se]);
        }
        let mut table = Builder::from(rows).build();
        table.with(Style::modern_rounded());
        table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical::optimization::least_squares::CurveFit;
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    fn line_fit() -> CurveFit {
        // y = 1 + 2x with alternating +-0.1 noise
        let x = dvector![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let noise = dvector![0.1, -0.1, 0.1, -0.1, 0.1, -0.1];
        let y = x.map(|xi| 1.0 + 2.0 * xi) + noise;
        CurveFit::new(x, y, 2, Box::new(|x: f64, p: &DVector<f64>| p[0] + p[1] * x))
            .unwrap()
            .with_gradient(Box::new(|x: f64, _p: &DVector<f64>| dvector![1.0, x]))
    }

    #[test]
    fn test_linear_fit_statistics() {
        let objective = LeastSquaresObjective::new(line_fit());
        // ordinary least squares solution of the noisy line
        let (x, y) = objective.problem().observations();
        let xm = x.mean();
        let ym = y.mean();
        let sxy: f64 = x.iter().zip(y.iter()).map(|(a, b)| (a - xm) * (b - ym)).sum();
        let sxx: f64 = x.iter().map(|a| (a - xm).powi(2)).sum();
        let slope = sxy / sxx;
        let intercept = ym - slope * xm;
        let params = dvector![intercept, slope];

        let stats = FitStatistics::compute(&objective, &params).unwrap();
        assert_eq!(stats.degrees_of_freedom, 4);
        let r = objective.problem().residuals(&params).unwrap();
        assert_relative_eq!(stats.residual_sum_of_squares, r.norm_squared(), epsilon = 1e-14);
        let s2 = stats.reduced_chi_square.unwrap();
        assert_relative_eq!(s2, r.norm_squared() / 4.0, epsilon = 1e-14);
        // textbook standard error of the slope: sqrt(s^2 / Sxx)
        let se = stats.standard_errors.clone().unwrap();
        assert_relative_eq!(se[1], (s2 / sxx).sqrt(), max_relative = 1e-10);
        let corr = stats.correlation.clone().unwrap();
        assert_relative_eq!(corr[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(corr[(0, 1)], corr[(1, 0)], epsilon = 1e-14);
        assert!(corr[(0, 1)] < 0.0);
        assert!(stats.parameter_table(&params).contains("std. error"));
    }

    #[test]
    fn test_no_degrees_of_freedom() {
        let fit = CurveFit::new(dvector![1.0, 2.0], dvector![3.0, 5.0], 2, Box::new(|x: f64, p: &DVector<f64>| p[0] + p[1] * x)).unwrap();
        let stats = FitStatistics::compute(&LeastSquaresObjective::new(fit), &dvector![1.0, 2.0]).unwrap();
        assert_eq!(stats.degrees_of_freedom, 0);
        assert!(stats.covariance.is_none());
        assert!(stats.reduced_chi_square.is_none());
    }

    #[test]
    fn test_singular_normal_matrix() {
        // p0 and p1 enter only through their sum
        let x = dvector![0.0, 1.0, 2.0, 3.0];
        let y = dvector![1.0, 2.0, 3.0, 4.0];
        let fit = CurveFit::new(x, y, 2, Box::new(|x: f64, p: &DVector<f64>| (p[0] + p[1]) * x + 1.0))
            .unwrap()
            .with_gradient(Box::new(|x: f64, _p: &DVector<f64>| dvector![x, x]));
        let stats = FitStatistics::compute(&LeastSquaresObjective::new(fit), &dvector![0.5, 0.5]).unwrap();
        assert!(stats.covariance.is_none());
        assert!(stats.standard_errors.is_none());
        assert!(stats.correlation.is_none());
        assert!(stats.parameter_table(&dvector![0.5, 0.5]).contains('-'));
    }
}
