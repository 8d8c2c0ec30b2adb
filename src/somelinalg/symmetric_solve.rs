//! Solving symmetric systems B*x = rhs that come from curvature matrices
//! (Hessians, J^T*J).
use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector};
use std::fmt;

/// Why a symmetric system could not be solved
#[derive(Debug, Clone, PartialEq)]
pub enum LinearSolveError {
    /// matrix and right-hand side do not fit together
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },
    /// Cholesky factorization failed: the matrix is indefinite or singular
    NotPositiveDefinite,
    /// factorization succeeded but the reciprocal condition estimate is too small
    IllConditioned { rcond: f64 },
    /// solution contains NaN or infinity
    NonFiniteSolution,
}

impl fmt::Display for LinearSolveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinearSolveError::DimensionMismatch { rows, cols, rhs } => write!(
                f,
                "dimension mismatch: matrix is {}x{}, right-hand side has length {}",
                rows, cols, rhs
            ),
            LinearSolveError::NotPositiveDefinite => {
                write!(f, "matrix is not positive definite")
            }
            LinearSolveError::IllConditioned { rcond } => {
                write!(f, "matrix is ill-conditioned (rcond estimate = {:.3e})", rcond)
            }
            LinearSolveError::NonFiniteSolution => write!(f, "solution is not finite"),
        }
    }
}

impl std::error::Error for LinearSolveError {}

/// Cheap estimate of the reciprocal condition number of B = L*L^T taken from
/// the diagonal of the Cholesky factor: (min l_ii / max l_ii)^2.
pub fn cholesky_rcond_estimate(chol: &Cholesky<f64, nalgebra::Dyn>) -> f64 {
    let l = chol.l_dirty();
    let n = l.nrows();
    if n == 0 {
        return 1.0;
    }
    let (mut min_d, mut max_d) = (f64::INFINITY, 0.0_f64);
    for i in 0..n {
        let d = l[(i, i)].abs();
        min_d = min_d.min(d);
        max_d = max_d.max(d);
    }
    if max_d == 0.0 {
        return 0.0;
    }
    (min_d / max_d).powi(2)
}

/// Solve B*x = rhs for a symmetric positive definite B.
/// Indefinite or singular B gives `NotPositiveDefinite`, a factor with
/// rcond estimate below `rcond_tolerance` gives `IllConditioned`.
pub fn solve_symmetric_positive_definite(
    matrix: &DMatrix<f64>,
    rhs: &DVector<f64>,
    rcond_tolerance: f64,
) -> Result<DVector<f64>, LinearSolveError> {
    let (rows, cols) = matrix.shape();
    if rows != cols || rows != rhs.len() {
        return Err(LinearSolveError::DimensionMismatch {
            rows,
            cols,
            rhs: rhs.len(),
        });
    }

    let chol = Cholesky::new(matrix.clone()).ok_or(LinearSolveError::NotPositiveDefinite)?;
    let rcond = cholesky_rcond_estimate(&chol);
    if rcond < rcond_tolerance {
        debug!("Cholesky factor is ill-conditioned, rcond = {:.3e}", rcond);
        return Err(LinearSolveError::IllConditioned { rcond });
    }

    let solution = chol.solve(rhs);
    if solution.iter().any(|x| !x.is_finite()) {
        return Err(LinearSolveError::NonFiniteSolution);
    }
    Ok(solution)
}

/// Inverse of a symmetric positive definite matrix, used for covariance estimates
pub fn invert_symmetric_positive_definite(
    matrix: &DMatrix<f64>,
    rcond_tolerance: f64,
) -> Result<DMatrix<f64>, LinearSolveError> {
    let (rows, cols) = matrix.shape();
    if rows != cols {
        return Err(LinearSolveError::DimensionMismatch {
            rows,
            cols,
            rhs: rows,
        });
    }
    let chol = Cholesky::new(matrix.clone()).ok_or(LinearSolveError::NotPositiveDefinite)?;
    let rcond = cholesky_rcond_estimate(&chol);
    if rcond < rcond_tolerance {
        return Err(LinearSolveError::IllConditioned { rcond });
    }
    let inverse = chol.inverse();
    if inverse.iter().any(|x| !x.is_finite()) {
        return Err(LinearSolveError::NonFiniteSolution);
    }
    Ok(inverse)
}
