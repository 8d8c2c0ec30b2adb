//! Small geometric helpers shared by the trust region subproblem solvers
use approx::relative_eq;
use nalgebra::DVector;

/// relative tolerance used to decide whether a step lies on the boundary
pub(crate) const BOUNDARY_RTOL: f64 = 1e-12;

/// Both roots of ||p + tau*d|| = radius, smaller first.
///
/// Solves a*tau^2 + b*tau + c = 0 with a = d.d, b = 2 p.d, c = p.p - radius^2.
/// For p strictly inside the ball c < 0, so the roots have opposite signs.
/// The root that does not suffer from cancellation is computed first and the
/// other one is recovered from tau1*tau2 = c/a.
pub(crate) fn boundary_roots(p: &DVector<f64>, d: &DVector<f64>, radius: f64) -> Option<(f64, f64)> {
    let a = d.norm_squared();
    if a == 0.0 {
        return None;
    }
    let b = 2.0 * p.dot(d);
    // (||p|| + r)(||p|| - r) keeps precision when ||p|| is close to r
    let p_norm = p.norm();
    let c = (p_norm + radius) * (p_norm - radius);
    let discriminant = (b * b - 4.0 * a * c).max(0.0);
    let sqrt_disc = discriminant.sqrt();
    let q = if b >= 0.0 {
        -0.5 * (b + sqrt_disc)
    } else {
        -0.5 * (b - sqrt_disc)
    };
    if q == 0.0 {
        // b == 0 and c == 0: p on the boundary and orthogonal to d
        return Some((0.0, 0.0));
    }
    let t1 = q / a;
    let t2 = c / q;
    Some(if t1 <= t2 { (t1, t2) } else { (t2, t1) })
}

/// Positive tau with ||p + tau*d|| = radius (0 if d vanishes)
pub(crate) fn positive_boundary_tau(p: &DVector<f64>, d: &DVector<f64>, radius: f64) -> f64 {
    match boundary_roots(p, d, radius) {
        Some((_, t_max)) => t_max.max(0.0),
        None => 0.0,
    }
}

/// -radius * g/||g||, steepest descent scaled to the trust region boundary
pub(crate) fn scaled_steepest_descent(gradient: &DVector<f64>, radius: f64) -> DVector<f64> {
    let g_norm = gradient.norm();
    if g_norm == 0.0 {
        return DVector::zeros(gradient.len());
    }
    gradient * (-radius / g_norm)
}

/// true when ||step|| equals the radius up to a relative tolerance
pub(crate) fn on_boundary(step_norm: f64, radius: f64) -> bool {
    relative_eq!(step_norm, radius, max_relative = BOUNDARY_RTOL) || step_norm > radius
}

pub(crate) fn is_finite_vector(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}
