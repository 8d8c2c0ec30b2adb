use crate::Utils::logger::save_history_to_csv;
use crate::numerical::optimization::benchmark_functions::Rosenbrock;
use crate::numerical::optimization::fit_statistics::FitStatistics;
use crate::numerical::optimization::least_squares::{
    CurveFit, FiniteDifference, LeastSquaresObjective,
};
use crate::numerical::optimization::trust_region_config::TrustRegionConfig;
use crate::numerical::optimization::trust_region_main::{TrustRegionMinimizer, TrustRegionResult};
use crate::numerical::optimization::trust_region_subproblem::SubproblemKind;
use log::{error, info};
use nalgebra::{DVector, dvector};

fn report(name: &str, result: &TrustRegionResult) {
    info!(
        "{}: x = {:?}, f = {:.6e}, {} after {} iterations",
        name,
        result.point.as_slice(),
        result.value,
        result.termination,
        result.iterations
    );
}

pub fn trust_region_examples(example: usize) {
    match example {
        0 => {
            // Rosenbrock function with both subproblem solvers
            for kind in [SubproblemKind::DogLeg, SubproblemKind::NewtonCG] {
                let config = TrustRegionConfig {
                    subproblem: kind,
                    gradient_tolerance: 1e-6,
                    ..Default::default()
                };
                let minimizer = match TrustRegionMinimizer::new(config) {
                    Ok(m) => m,
                    Err(e) => {
                        error!("{}", e);
                        return;
                    }
                };
                match minimizer.minimize(&Rosenbrock::default(), dvector![-1.2, 1.0]) {
                    Ok(result) => report(&format!("Rosenbrock, {}", kind), &result),
                    Err(e) => error!("{}", e),
                }
            }
        }
        1 => {
            // matrix-free curvature: Newton-CG only needs Hessian-vector products
            let config = TrustRegionConfig {
                subproblem: SubproblemKind::NewtonCG,
                max_cg_iterations: Some(10),
                ..Default::default()
            };
            let result = TrustRegionMinimizer::new(config)
                .map_err(|e| e.to_string())
                .and_then(|m| {
                    m.minimize(&Rosenbrock::matrix_free(), dvector![2.0, -1.0])
                        .map_err(|e| e.to_string())
                });
            match result {
                Ok(result) => report("matrix-free Rosenbrock", &result),
                Err(e) => error!("{}", e),
            }
        }
        2 => {
            // y = a*exp(-k*x) fitted to noisy data, Jacobian by central differences
            let x = DVector::from_iterator(30, (0..30).map(|i| i as f64 * 0.2));
            let noise = DVector::from_iterator(30, (0..30).map(|i| 0.01 * ((i * 7 % 11) as f64 - 5.0) / 5.0));
            let y = x.map(|xi| 3.0 * (-0.45 * xi).exp()) + noise;
            let fit = match CurveFit::new(x, y, 2, Box::new(|x: f64, p: &DVector<f64>| p[0] * (-p[1] * x).exp())) {
                Ok(fit) => fit,
                Err(e) => {
                    error!("{}", e);
                    return;
                }
            };
            let objective =
                LeastSquaresObjective::new(fit).with_finite_difference(FiniteDifference::Central);
            let minimizer = match TrustRegionMinimizer::new(TrustRegionConfig::default()) {
                Ok(m) => m,
                Err(e) => {
                    error!("{}", e);
                    return;
                }
            };
            match minimizer.minimize(&objective, dvector![1.0, 1.0]) {
                Ok(result) => {
                    report("exponential decay fit", &result);
                    match FitStatistics::compute(&objective, &result.point) {
                        Ok(stats) => info!(
                            "\n reduced chi-square = {:?} \n {}",
                            stats.reduced_chi_square,
                            stats.parameter_table(&result.point)
                        ),
                        Err(e) => error!("{}", e),
                    }
                }
                Err(e) => error!("{}", e),
            }
        }
        3 => {
            // configuration from a TOML document
            let document = r#"
                [trust_region]
                initial_radius = 0.5
                gradient_tolerance = 1e-9
                subproblem = "newton_cg"
            "#;
            match TrustRegionConfig::from_toml_str(document) {
                Ok(config) => {
                    info!("parsed configuration:\n{}", config.to_toml_string());
                    if let Ok(minimizer) = TrustRegionMinimizer::new(config) {
                        if let Ok(result) =
                            minimizer.minimize(&Rosenbrock::default(), dvector![-1.2, 1.0])
                        {
                            report("Rosenbrock from TOML config", &result);
                        }
                    }
                }
                Err(e) => error!("{}", e),
            }
        }
        4 => {
            // independent runs from several start points in parallel
            let starts: Vec<DVector<f64>> = (0..8)
                .map(|i| {
                    let t = i as f64 * std::f64::consts::PI / 4.0;
                    dvector![2.0 * t.cos(), 2.0 * t.sin()]
                })
                .collect();
            let minimizer = match TrustRegionMinimizer::new(TrustRegionConfig::default()) {
                Ok(m) => m,
                Err(e) => {
                    error!("{}", e);
                    return;
                }
            };
            let multi = minimizer.minimize_multistart(&Rosenbrock::default(), &starts);
            if let Some(best) = multi.best_result() {
                report("best of multi-start", best);
            }
        }
        5 => {
            // iteration history to CSV
            let minimizer = match TrustRegionMinimizer::new(TrustRegionConfig::default()) {
                Ok(m) => m,
                Err(e) => {
                    error!("{}", e);
                    return;
                }
            };
            if let Ok(result) = minimizer.minimize(&Rosenbrock::default(), dvector![-1.2, 1.0]) {
                match save_history_to_csv(&result.history, "rosenbrock_history.csv") {
                    Ok(()) => info!("history saved to rosenbrock_history.csv"),
                    Err(e) => error!("cannot save history: {}", e),
                }
            }
        }
        _ => {}
    }
}
