//! Steihaug-Toint truncated conjugate gradient solver of the trust region subproblem.
//!
//! CG is run on B*p = -g starting from p = 0. The first iterate is the Cauchy
//! point and every further iterate decreases the quadratic model, so the
//! returned step is at least as good as the Cauchy point. Iteration stops at
//! the first of
//! - a direction of non-positive curvature (step extended to the boundary),
//! - an iterate leaving the trust region (step cut at the boundary),
//! - residual ||r|| below eta*||g||,
//! - the iteration bound.
//!
//! Only curvature-vector products are used, the curvature matrix is never formed.
use crate::numerical::optimization::objective_model::ObjectiveModel;
use crate::numerical::optimization::trust_region_subproblem::{
    SolveFailure, StepTermination, TrustRegionStep, TrustRegionSubproblem,
};
use crate::numerical::optimization::utils::{
    is_finite_vector, positive_boundary_tau, scaled_steepest_descent,
};
use log::debug;
use nalgebra::DVector;

#[derive(Debug, Clone, PartialEq)]
pub struct NewtonCG {
    /// bound on CG iterations, `None` means the problem dimension
    pub max_iterations: Option<usize>,
    /// eta in ||r|| < eta*||g||; `None` means the forcing term min(0.5, sqrt(||g||))
    pub relative_tolerance: Option<f64>,
    /// d^T*B*d <= curvature_epsilon*||d||^2 is treated as non-positive curvature
    pub curvature_epsilon: f64,
}

impl Default for NewtonCG {
    fn default() -> Self {
        NewtonCG {
            max_iterations: None,
            relative_tolerance: None,
            curvature_epsilon: f64::EPSILON,
        }
    }
}

impl NewtonCG {
    fn residual_tolerance(&self, g_norm: f64) -> f64 {
        let eta = self
            .relative_tolerance
            .unwrap_or_else(|| g_norm.sqrt().min(0.5));
        eta * g_norm
    }

    fn to_boundary(
        p: &DVector<f64>,
        d: &DVector<f64>,
        radius: f64,
        termination: StepTermination,
    ) -> TrustRegionStep {
        let tau = positive_boundary_tau(p, d, radius);
        debug!("newton_cg: {} , tau = {:.6}", termination, tau);
        TrustRegionStep::solved(p + d * tau, true, termination)
    }
}

impl TrustRegionSubproblem for NewtonCG {
    fn solve(&self, model: &ObjectiveModel, radius: f64) -> TrustRegionStep {
        let n = model.dimension();
        let gradient = model.gradient();
        let g_norm = gradient.norm();
        if g_norm == 0.0 {
            return TrustRegionStep::zero(n);
        }
        let tolerance = self.residual_tolerance(g_norm);
        let max_iterations = self.max_iterations.unwrap_or(n).max(1);

        let mut p: DVector<f64> = DVector::zeros(n);
        let mut r = gradient.clone();
        let mut d = -gradient;
        let mut r_sq = r.norm_squared();

        for iteration in 0..max_iterations {
            let bd = model.curvature_product(&d);
            let d_b_d = d.dot(&bd);
            // written so that NaN also takes this branch
            if !(d_b_d > self.curvature_epsilon * d.norm_squared()) {
                let step = Self::to_boundary(&p, &d, radius, StepTermination::NegativeCurvature);
                if !is_finite_vector(&step.step) {
                    break;
                }
                return step;
            }

            let alpha = r_sq / d_b_d;
            let p_next = &p + &d * alpha;
            if p_next.norm() >= radius {
                return Self::to_boundary(&p, &d, radius, StepTermination::ExceededRadius);
            }

            r.axpy(alpha, &bd, 1.0);
            let r_sq_next = r.norm_squared();
            p = p_next;
            if r_sq_next.sqrt() < tolerance {
                debug!("newton_cg: residual converged after {} iterations", iteration + 1);
                return TrustRegionStep::solved(p, false, StepTermination::ResidualConverged);
            }

            let beta = r_sq_next / r_sq;
            r_sq = r_sq_next;
            d = &d * beta - &r;
        }

        if !is_finite_vector(&p) {
            return TrustRegionStep::fallback(
                scaled_steepest_descent(gradient, radius),
                true,
                StepTermination::CauchyPoint,
                SolveFailure::NonFiniteStep,
            );
        }
        TrustRegionStep::solved(p, false, StepTermination::MaxIterations)
    }

    fn name(&self) -> &'static str {
        "newton_cg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical::optimization::dogleg::DogLeg;
    use crate::numerical::optimization::objective_model::{Curvature, CurvatureOperator};
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, dmatrix, dvector};
    use std::sync::Arc;

    fn model_with(gradient: DVector<f64>, b: DMatrix<f64>) -> ObjectiveModel {
        let n = gradient.len();
        ObjectiveModel::new(DVector::zeros(n), 0.0, gradient, Curvature::Dense(b)).unwrap()
    }

    fn tight() -> NewtonCG {
        NewtonCG {
            relative_tolerance: Some(1e-12),
            ..NewtonCG::default()
        }
    }

    #[test]
    fn test_decrease_at_least_cauchy() {
        let cases = vec![
            (dvector![1.0, 2.0], dmatrix![4.0, 1.0; 1.0, 3.0]),
            (dvector![-3.0, 0.5, 1.0], dmatrix![10.0, 2.0, 0.0; 2.0, 5.0, 1.0; 0.0, 1.0, 0.5]),
            (dvector![0.1, -0.2], dmatrix![1000.0, 0.0; 0.0, 0.01]),
        ];
        for (g, b) in cases {
            let model = model_with(g.clone(), b.clone());
            for radius in [1e-3, 0.1, 1.0, 10.0, 1e3] {
                for solver in [NewtonCG::default(), tight()] {
                    let step = solver.solve(&model, radius);
                    let cauchy = DogLeg::cauchy_point(&g, &b, radius).step;
                    let m_cg = model.model_change(&step.step);
                    let m_c = model.model_change(&cauchy);
                    assert!(
                        m_cg <= m_c + 1e-12 * m_c.abs().max(1.0),
                        "radius {}: cg {} > cauchy {}",
                        radius,
                        m_cg,
                        m_c
                    );
                    assert!(step.norm() <= radius * (1.0 + 1e-9));
                }
            }
        }
    }

    #[test]
    fn test_negative_curvature_first_direction() {
        let model = model_with(dvector![1.0, 1.0], dmatrix![1.0, 0.0; 0.0, -2.0]);
        let res = NewtonCG::default().solve(&model, 0.7);
        assert_eq!(res.termination, StepTermination::NegativeCurvature);
        assert!(res.hit_boundary);
        assert_relative_eq!(res.norm(), 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_negative_curvature_later_direction() {
        let model = model_with(dvector![1.0, 0.1], dmatrix![2.0, 0.0; 0.0, -1.0]);
        let res = tight().solve(&model, 10.0);
        assert_eq!(res.termination, StepTermination::NegativeCurvature);
        assert!(res.hit_boundary);
        assert_relative_eq!(res.norm(), 10.0, epsilon = 1e-10);
        assert!(model.model_change(&res.step) < 0.0);
    }

    #[test]
    fn test_exceeded_radius() {
        let model = model_with(dvector![1.0, 1.0], dmatrix![1.0, 0.0; 0.0, 1.0]);
        let res = NewtonCG::default().solve(&model, 0.1);
        assert_eq!(res.termination, StepTermination::ExceededRadius);
        assert!(res.hit_boundary);
        assert_relative_eq!(res.norm(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_residual_converged_gives_newton_step() {
        let model = model_with(dvector![1.0, 2.0], dmatrix![4.0, 1.0; 1.0, 3.0]);
        let res = tight().solve(&model, 100.0);
        assert_eq!(res.termination, StepTermination::ResidualConverged);
        assert!(!res.hit_boundary);
        assert_relative_eq!(res.step, dvector![-1.0 / 11.0, -7.0 / 11.0], epsilon = 1e-12);
    }

    #[test]
    fn test_max_iterations() {
        let g = dvector![1.0, 1.0];
        let b = dmatrix![1.0, 0.0; 0.0, 10.0];
        let model = model_with(g.clone(), b.clone());
        let solver = NewtonCG {
            max_iterations: Some(1),
            relative_tolerance: Some(1e-12),
            ..NewtonCG::default()
        };
        let res = solver.solve(&model, 100.0);
        assert_eq!(res.termination, StepTermination::MaxIterations);
        assert!(!res.hit_boundary);
        // one CG iteration is the Cauchy point
        let cauchy = DogLeg::cauchy_point(&g, &b, 100.0).step;
        assert_relative_eq!(res.step, cauchy, epsilon = 1e-14);
    }

    #[test]
    fn test_operator_curvature() {
        let b = dmatrix![4.0, 1.0; 1.0, 3.0];
        let bc = b.clone();
        let op: CurvatureOperator = Arc::new(move |v: &DVector<f64>| &bc * v);
        let dense = model_with(dvector![1.0, 2.0], b);
        let matrix_free = ObjectiveModel::new(
            DVector::zeros(2),
            0.0,
            dvector![1.0, 2.0],
            Curvature::Operator(op),
        )
        .unwrap();
        for radius in [0.05, 0.5, 5.0] {
            let a = tight().solve(&dense, radius);
            let b = tight().solve(&matrix_free, radius);
            assert_relative_eq!(a.step, b.step, epsilon = 1e-14);
            assert_eq!(a.termination, b.termination);
        }
    }

    #[test]
    fn test_zero_gradient() {
        let model = model_with(dvector![0.0, 0.0], dmatrix![1.0, 0.0; 0.0, -1.0]);
        let res = NewtonCG::default().solve(&model, 1.0);
        assert_eq!(res.termination, StepTermination::ZeroGradient);
        assert!(!res.hit_boundary);
        assert_eq!(res.norm(), 0.0);
    }

    #[test]
    fn test_solve_is_idempotent() {
        let model = model_with(dvector![-3.0, 0.5, 1.0], dmatrix![10.0, 2.0, 0.0; 2.0, 5.0, 1.0; 0.0, 1.0, 0.5]);
        let solver = NewtonCG::default();
        for radius in [0.01, 0.4, 4.0] {
            assert_eq!(solver.solve(&model, radius), solver.solve(&model, radius));
        }
    }
}
