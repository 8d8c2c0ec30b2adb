//! some linear algebra functions used throughout the code
/// Cholesky based solves and inverses of symmetric positive definite systems
pub mod symmetric_solve;
