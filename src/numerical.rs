//! numerical methods
/// trust region minimization of smooth objectives and nonlinear least squares
pub mod optimization;
