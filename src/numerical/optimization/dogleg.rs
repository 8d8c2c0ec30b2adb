use crate::numerical::optimization::objective_model::ObjectiveModel;
use crate::numerical::optimization::trust_region_subproblem::{
    SolveFailure, StepTermination, TrustRegionStep, TrustRegionSubproblem,
};
use crate::numerical::optimization::utils::{
    boundary_roots, is_finite_vector, on_boundary, scaled_steepest_descent,
};
use crate::somelinalg::symmetric_solve::{LinearSolveError, solve_symmetric_positive_definite};
use log::debug;
use nalgebra::{DMatrix, DVector};
/*
Powell dogleg (Nocedal & Wright, ch. 4.1):
    p_C = -(g^T g)/(g^T B g) * g            Cauchy point
    p_N = -B^{-1} g                         Newton point
path:
    p(tau) = tau * p_C                      0 <= tau <= 1
    p(tau) = p_C + (tau - 1)(p_N - p_C)     1 <= tau <= 2
||p(tau)|| is increasing and m(p(tau)) is decreasing along the path when B is
positive definite, so the boundary crossing is the best point of the path.
*/

/// Steepest descent part of the dogleg path
#[derive(Debug, Clone)]
pub struct CauchyPoint {
    pub step: DVector<f64>,
    /// the step was shortened to the radius (or g^T B g <= 0)
    pub clipped: bool,
}

/// Dogleg trust region subproblem solver.
#[derive(Debug, Clone, PartialEq)]
pub struct DogLeg {
    /// Newton step is not trusted when the reciprocal condition estimate of
    /// the curvature falls below this value
    pub rcond_tolerance: f64,
}

impl Default for DogLeg {
    fn default() -> Self {
        DogLeg {
            rcond_tolerance: 1e-14,
        }
    }
}

impl DogLeg {
    pub fn new(rcond_tolerance: f64) -> Self {
        DogLeg { rcond_tolerance }
    }

    /// Minimizer of the model along -g, clipped to the radius.
    pub fn cauchy_point(gradient: &DVector<f64>, curvature: &DMatrix<f64>, radius: f64) -> CauchyPoint {
        let g_norm = gradient.norm();
        let g_b_g = gradient.dot(&(curvature * gradient));
        if g_b_g <= 0.0 {
            // model is unbounded below along -g: go all the way to the boundary
            return CauchyPoint {
                step: scaled_steepest_descent(gradient, radius),
                clipped: true,
            };
        }
        let alpha = gradient.norm_squared() / g_b_g;
        if alpha * g_norm >= radius {
            CauchyPoint {
                step: scaled_steepest_descent(gradient, radius),
                clipped: true,
            }
        } else {
            CauchyPoint {
                step: gradient * (-alpha),
                clipped: false,
            }
        }
    }

    /// Newton point -B^{-1} g, or why it could not be computed
    pub fn newton_point(
        &self,
        gradient: &DVector<f64>,
        curvature: &DMatrix<f64>,
    ) -> Result<DVector<f64>, SolveFailure> {
        solve_symmetric_positive_definite(curvature, &(-gradient), self.rcond_tolerance).map_err(
            |e| match e {
                LinearSolveError::IllConditioned { .. } => SolveFailure::SingularCurvature,
                LinearSolveError::NonFiniteSolution => SolveFailure::NonFiniteStep,
                // dimension mismatch cannot happen for a validated model
                LinearSolveError::NotPositiveDefinite | LinearSolveError::DimensionMismatch { .. } => {
                    SolveFailure::IndefiniteCurvature
                }
            },
        )
    }

    /// tau in [0, 2] where the dogleg path crosses the sphere of given radius.
    /// Returns 2 when the whole path is inside.
    pub fn dogleg_tau(cauchy: &DVector<f64>, newton: &DVector<f64>, radius: f64) -> f64 {
        let c_norm = cauchy.norm();
        if c_norm >= radius {
            return radius / c_norm;
        }
        if newton.norm() <= radius {
            return 2.0;
        }
        let diff = newton - cauchy;
        match boundary_roots(cauchy, &diff, radius) {
            Some((_, s)) => 1.0 + s.clamp(0.0, 1.0),
            None => 1.0,
        }
    }

    /// Point p(tau) of the dogleg path
    pub fn path_point(cauchy: &DVector<f64>, newton: &DVector<f64>, tau: f64) -> DVector<f64> {
        if tau <= 1.0 {
            cauchy * tau
        } else {
            cauchy + (newton - cauchy) * (tau - 1.0)
        }
    }
}

impl TrustRegionSubproblem for DogLeg {
    fn solve(&self, model: &ObjectiveModel, radius: f64) -> TrustRegionStep {
        let n = model.dimension();
        let gradient = model.gradient();
        if gradient.norm() == 0.0 {
            return TrustRegionStep::zero(n);
        }
        let curvature = model.curvature_matrix();
        let cauchy = Self::cauchy_point(gradient, &curvature, radius);

        let newton = match self.newton_point(gradient, &curvature) {
            Ok(newton) => newton,
            Err(failure) => {
                debug!("dogleg: Newton step unavailable ({}), using Cauchy point", failure);
                let norm = cauchy.step.norm();
                return TrustRegionStep::fallback(
                    cauchy.step,
                    cauchy.clipped || on_boundary(norm, radius),
                    StepTermination::CauchyPoint,
                    failure,
                );
            }
        };

        let newton_norm = newton.norm();
        if newton_norm <= radius {
            debug!("dogleg: Newton step inside trust region, ||p_N|| = {:.4e}", newton_norm);
            return TrustRegionStep::solved(
                newton,
                on_boundary(newton_norm, radius),
                StepTermination::NewtonStep,
            );
        }
        if cauchy.clipped {
            debug!("dogleg: Cauchy point outside trust region, step truncated");
            return TrustRegionStep::solved(cauchy.step, true, StepTermination::CauchyPoint);
        }

        let tau = Self::dogleg_tau(&cauchy.step, &newton, radius);
        let step = Self::path_point(&cauchy.step, &newton, tau);
        debug!("dogleg: tau = {:.6}", tau);
        if !is_finite_vector(&step) {
            return TrustRegionStep::fallback(
                scaled_steepest_descent(gradient, radius),
                true,
                StepTermination::CauchyPoint,
                SolveFailure::NonFiniteStep,
            );
        }
        TrustRegionStep::solved(step, true, StepTermination::DoglegPath)
    }

    fn name(&self) -> &'static str {
        "dogleg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical::optimization::objective_model::Curvature;
    use crate::numerical::optimization::trust_region_subproblem::StepOrigin;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    // Helper function to create a simple test problem with positive definite curvature
    fn create_test_model() -> ObjectiveModel {
        ObjectiveModel::new(
            dvector![0.0, 0.0],
            0.0,
            dvector![1.0, 2.0],
            Curvature::Dense(dmatrix![4.0, 1.0; 1.0, 3.0]),
        )
        .unwrap()
    }

    fn model_with(gradient: DVector<f64>, b: DMatrix<f64>) -> ObjectiveModel {
        let n = gradient.len();
        ObjectiveModel::new(DVector::zeros(n), 0.0, gradient, Curvature::Dense(b)).unwrap()
    }

    fn newton_step(model: &ObjectiveModel) -> DVector<f64> {
        model
            .curvature_matrix()
            .lu()
            .solve(&(-model.gradient()))
            .unwrap()
    }

    #[test]
    fn test_newton_step_inside_region() {
        let model = create_test_model();
        let p_n = newton_step(&model);
        let solver = DogLeg::default();
        for factor in [1.000001, 1.5, 10.0, 1e6] {
            let res = solver.solve(&model, factor * p_n.norm());
            assert_eq!(res.termination, StepTermination::NewtonStep);
            assert!(!res.hit_boundary);
            assert_relative_eq!(res.step, p_n.clone(), epsilon = 1e-14);
        }
    }

    #[test]
    fn test_step_never_exceeds_radius() {
        let model = create_test_model();
        let solver = DogLeg::default();
        let mut radius = 1e-4;
        while radius < 10.0 {
            let res = solver.solve(&model, radius);
            assert!(res.norm() <= radius * (1.0 + 1e-9), "radius {}", radius);
            radius *= 1.7;
        }
    }

    #[test]
    fn test_cauchy_point_truncated() {
        let model = create_test_model();
        let solver = DogLeg::default();
        let curvature = model.curvature_matrix();
        let unclipped = DogLeg::cauchy_point(model.gradient(), &curvature, 1e9);
        assert!(!unclipped.clipped);
        let radius = 0.5 * unclipped.step.norm();
        let res = solver.solve(&model, radius);
        assert_eq!(res.termination, StepTermination::CauchyPoint);
        assert!(res.hit_boundary);
        assert_relative_eq!(res.norm(), radius, epsilon = 1e-12);
        // direction is steepest descent
        let cos = res.step.normalize().dot(&(-model.gradient()).normalize());
        assert_relative_eq!(cos, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dogleg_interpolation() {
        let model = create_test_model();
        let solver = DogLeg::default();
        let curvature = model.curvature_matrix();
        let p_c = DogLeg::cauchy_point(model.gradient(), &curvature, 1e9).step;
        let p_n = newton_step(&model);
        assert!(p_c.norm() < p_n.norm());
        let radius = 0.5 * (p_c.norm() + p_n.norm());
        let res = solver.solve(&model, radius);
        assert_eq!(res.termination, StepTermination::DoglegPath);
        assert!(res.hit_boundary);
        assert_relative_eq!(res.norm(), radius, epsilon = 1e-12);

        // step lies on the segment Cauchy -> Newton
        let seg = &p_n - &p_c;
        let s = (&res.step - &p_c).dot(&seg) / seg.norm_squared();
        assert!((0.0..=1.0).contains(&s));
        assert_relative_eq!(&p_c + &seg * s, res.step.clone(), epsilon = 1e-12);
    }

    #[test]
    fn test_dogleg_tau_ranges() {
        let p_c = dvector![1.0, 0.0];
        let p_n = dvector![1.0, 2.0];
        // first leg
        assert_relative_eq!(DogLeg::dogleg_tau(&p_c, &p_n, 0.5), 0.5, epsilon = 1e-14);
        // second leg: ||(1, 2s)|| = sqrt(2) -> s = 0.5
        let tau = DogLeg::dogleg_tau(&p_c, &p_n, 2.0_f64.sqrt());
        assert_relative_eq!(tau, 1.5, epsilon = 1e-12);
        assert_relative_eq!(
            DogLeg::path_point(&p_c, &p_n, tau),
            dvector![1.0, 1.0],
            epsilon = 1e-12
        );
        // whole path inside
        assert_eq!(DogLeg::dogleg_tau(&p_c, &p_n, 10.0), 2.0);
    }

    #[test]
    fn test_zero_gradient() {
        let model = model_with(dvector![0.0, 0.0], dmatrix![1.0, 0.0; 0.0, 1.0]);
        let res = DogLeg::default().solve(&model, 1.0);
        assert_eq!(res.termination, StepTermination::ZeroGradient);
        assert!(!res.hit_boundary);
        assert_eq!(res.norm(), 0.0);
    }

    #[test]
    fn test_indefinite_curvature_falls_back_to_cauchy() {
        let model = model_with(dvector![1.0, 0.0], dmatrix![1.0, 0.0; 0.0, -1.0]);
        let res = DogLeg::default().solve(&model, 0.5);
        assert_eq!(
            res.origin,
            StepOrigin::Fallback(SolveFailure::IndefiniteCurvature)
        );
        assert_eq!(res.termination, StepTermination::CauchyPoint);
        assert!(res.hit_boundary);
        assert_relative_eq!(res.step, dvector![-0.5, 0.0], epsilon = 1e-14);
    }

    #[test]
    fn test_negative_curvature_along_gradient() {
        let model = model_with(dvector![0.0, 1.0], dmatrix![1.0, 0.0; 0.0, -1.0]);
        let res = DogLeg::default().solve(&model, 2.0);
        assert!(res.is_fallback());
        assert!(res.hit_boundary);
        assert_relative_eq!(res.step, dvector![0.0, -2.0], epsilon = 1e-14);
    }

    #[test]
    fn test_near_singular_curvature() {
        let model = model_with(dvector![1.0, 1.0], dmatrix![1.0, 0.0; 0.0, 1e-20]);
        let res = DogLeg::default().solve(&model, 0.1);
        assert_eq!(
            res.origin,
            StepOrigin::Fallback(SolveFailure::SingularCurvature)
        );
        assert!(res.norm() <= 0.1 * (1.0 + 1e-12));
    }

    #[test]
    fn test_solve_is_idempotent() {
        let model = create_test_model();
        let solver = DogLeg::default();
        for radius in [0.05, 0.3, 2.0] {
            let a = solver.solve(&model, radius);
            let b = solver.solve(&model, radius);
            assert_eq!(a, b);
        }
    }
}
