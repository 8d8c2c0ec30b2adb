use crate::numerical::optimization::dogleg::DogLeg;
use crate::numerical::optimization::newton_cg::NewtonCG;
use crate::numerical::optimization::objective_model::ObjectiveModel;
use enum_dispatch::enum_dispatch;
use nalgebra::DVector;
use strum_macros::{Display, EnumString};
/*
Trust region subproblem:
    min_p  m(p) = f + g^T*p + 0.5*p^T*B*p   subject to ||p|| <= delta
Two approximate solvers are available:
 - DogLeg: piecewise linear path origin -> Cauchy point -> Newton point, needs the dense B
 - NewtonCG: Steihaug-Toint truncated conjugate gradients, needs only products B*v
Both are variants of the `Subproblem` enum; the control loop only sees the trait.
*/

/// Why the subproblem solver stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StepTermination {
    /// gradient is zero, the step is zero
    ZeroGradient,
    /// unconstrained Newton step lies inside the region
    NewtonStep,
    /// Cauchy point clipped to the boundary
    CauchyPoint,
    /// boundary crossing of the Cauchy -> Newton segment
    DoglegPath,
    /// CG direction with non-positive curvature, step extended to the boundary
    NegativeCurvature,
    /// CG iterate left the region, step cut at the boundary
    ExceededRadius,
    /// CG residual dropped below the relative tolerance
    ResidualConverged,
    /// CG iteration bound reached
    MaxIterations,
}

/// Numerical failure that made a solver fall back to a safeguarded step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SolveFailure {
    /// curvature is not positive definite, Newton point is not a minimizer
    IndefiniteCurvature,
    /// curvature is (numerically) singular
    SingularCurvature,
    /// solver produced NaN/inf
    NonFiniteStep,
}

/// Whether the step was solved for or substituted by a fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOrigin {
    Solved,
    Fallback(SolveFailure),
}

/// Result of a subproblem solve
#[derive(Debug, Clone, PartialEq)]
pub struct TrustRegionStep {
    /// displacement from the current point
    pub step: DVector<f64>,
    /// whether ||step|| equals the radius
    pub hit_boundary: bool,
    pub termination: StepTermination,
    pub origin: StepOrigin,
}

impl TrustRegionStep {
    pub fn solved(step: DVector<f64>, hit_boundary: bool, termination: StepTermination) -> Self {
        TrustRegionStep {
            step,
            hit_boundary,
            termination,
            origin: StepOrigin::Solved,
        }
    }

    pub fn fallback(
        step: DVector<f64>,
        hit_boundary: bool,
        termination: StepTermination,
        failure: SolveFailure,
    ) -> Self {
        TrustRegionStep {
            step,
            hit_boundary,
            termination,
            origin: StepOrigin::Fallback(failure),
        }
    }

    pub fn zero(n: usize) -> Self {
        Self::solved(DVector::zeros(n), false, StepTermination::ZeroGradient)
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.origin, StepOrigin::Fallback(_))
    }

    pub fn norm(&self) -> f64 {
        self.step.norm()
    }
}

/// Approximate solver of the trust region subproblem.
/// Implementations must be deterministic and must not mutate hidden state:
/// the same model and radius always give the same step.
#[enum_dispatch]
pub trait TrustRegionSubproblem {
    fn solve(&self, model: &ObjectiveModel, radius: f64) -> TrustRegionStep;
    fn name(&self) -> &'static str;
}

/// Subproblem algorithm selected by configuration
#[enum_dispatch(TrustRegionSubproblem)]
#[derive(Debug, Clone, PartialEq)]
pub enum Subproblem {
    DogLeg(DogLeg),
    NewtonCG(NewtonCG),
}

/// Configuration tag of the subproblem algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum SubproblemKind {
    #[default]
    #[strum(to_string = "dogleg", serialize = "DogLeg")]
    DogLeg,
    #[strum(to_string = "newton_cg", serialize = "NewtonCG", serialize = "steihaug")]
    NewtonCG,
}

impl Subproblem {
    pub fn dogleg() -> Self {
        Subproblem::DogLeg(DogLeg::default())
    }

    pub fn newton_cg() -> Self {
        Subproblem::NewtonCG(NewtonCG::default())
    }

    pub fn from_kind(
        kind: SubproblemKind,
        max_cg_iterations: Option<usize>,
        cg_relative_tolerance: Option<f64>,
    ) -> Self {
        match kind {
            SubproblemKind::DogLeg => Self::dogleg(),
            SubproblemKind::NewtonCG => Subproblem::NewtonCG(NewtonCG {
                max_iterations: max_cg_iterations,
                relative_tolerance: cg_relative_tolerance,
                ..NewtonCG::default()
            }),
        }
    }

    pub fn kind(&self) -> SubproblemKind {
        match self {
            Subproblem::DogLeg(_) => SubproblemKind::DogLeg,
            Subproblem::NewtonCG(_) => SubproblemKind::NewtonCG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical::optimization::objective_model::Curvature;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};
    use std::str::FromStr;

    fn model() -> ObjectiveModel {
        ObjectiveModel::new(
            dvector![0.0, 0.0],
            1.0,
            dvector![1.0, -2.0],
            Curvature::Dense(dmatrix![3.0, 1.0; 1.0, 2.0]),
        )
        .unwrap()
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(SubproblemKind::from_str("dogleg").unwrap(), SubproblemKind::DogLeg);
        assert_eq!(
            SubproblemKind::from_str("newton_cg").unwrap(),
            SubproblemKind::NewtonCG
        );
        assert_eq!(
            SubproblemKind::from_str("steihaug").unwrap(),
            SubproblemKind::NewtonCG
        );
        assert!(SubproblemKind::from_str("lm").is_err());
    }

    #[test]
    fn test_dispatch_through_enum() {
        let m = model();
        let tight_cg = Subproblem::from_kind(SubproblemKind::NewtonCG, None, Some(1e-12));
        for sp in [Subproblem::dogleg(), tight_cg] {
            // a large radius makes both algorithms return the Newton step
            let step = sp.solve(&m, 100.0);
            let newton = dvector![-0.8, 1.4];
            assert_relative_eq!(step.step, newton, epsilon = 1e-10);
            assert!(!step.hit_boundary);
            assert!(!step.is_fallback());
        }
    }

    #[test]
    fn test_from_kind_passes_cg_options() {
        let sp = Subproblem::from_kind(SubproblemKind::NewtonCG, Some(7), Some(1e-3));
        match &sp {
            Subproblem::NewtonCG(cg) => {
                assert_eq!(cg.max_iterations, Some(7));
                assert_eq!(cg.relative_tolerance, Some(1e-3));
            }
            _ => panic!("expected NewtonCG"),
        }
        assert_eq!(sp.kind(), SubproblemKind::NewtonCG);
        assert_eq!(Subproblem::dogleg().name(), "dogleg");
    }
}
