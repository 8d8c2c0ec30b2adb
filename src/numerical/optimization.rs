/// objective function capability and the immutable model snapshot it produces
pub mod objective_model;
/// trust region subproblem interface and the tagged enum of its solvers
pub mod trust_region_subproblem;
/// Powell dogleg subproblem solver
pub mod dogleg;
/// Steihaug-Toint truncated conjugate gradient subproblem solver
pub mod newton_cg;
/// configuration of the trust region minimizer, TOML loading
pub mod trust_region_config;
/// main loop of the trust region minimizer
pub mod trust_region_main;
/// nonlinear least squares objectives, finite difference Jacobians and curve fitting
pub mod least_squares;
/// covariance and standard errors of fitted parameters
pub mod fit_statistics;
/// Rosenbrock and quadratic test functions
pub mod benchmark_functions;
/// some utility functions shared by the subproblem solvers
pub mod utils;
