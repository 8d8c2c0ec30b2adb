use RustedTrustRegion::numerical::optimization::benchmark_functions::Rosenbrock;
use RustedTrustRegion::numerical::optimization::trust_region_config::TrustRegionConfig;
use RustedTrustRegion::numerical::optimization::trust_region_main::TrustRegionMinimizer;
use RustedTrustRegion::numerical::optimization::trust_region_subproblem::SubproblemKind;
use criterion::{Criterion, criterion_group, criterion_main};
use nalgebra::dvector;
use std::hint::black_box;

fn rosenbrock_minimizer(kind: SubproblemKind) -> Option<TrustRegionMinimizer> {
    TrustRegionMinimizer::new(TrustRegionConfig {
        subproblem: kind,
        gradient_tolerance: 1e-6,
        ..Default::default()
    })
    .ok()
}

fn bench_rosenbrock_dogleg(c: &mut Criterion) {
    let Some(minimizer) = rosenbrock_minimizer(SubproblemKind::DogLeg) else {
        return;
    };
    let f = Rosenbrock::default();
    c.bench_function("Rosenbrock dogleg", |b| {
        b.iter(|| minimizer.minimize(&f, black_box(dvector![-1.2, 1.0])))
    });
}

fn bench_rosenbrock_newton_cg(c: &mut Criterion) {
    let Some(minimizer) = rosenbrock_minimizer(SubproblemKind::NewtonCG) else {
        return;
    };
    let f = Rosenbrock::matrix_free();
    c.bench_function("Rosenbrock newton_cg", |b| {
        b.iter(|| minimizer.minimize(&f, black_box(dvector![-1.2, 1.0])))
    });
}

criterion_group!(benches, bench_rosenbrock_dogleg, bench_rosenbrock_newton_cg);
criterion_main!(benches);
