use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use rf_coverage::coverage::{CoverageSweep, HalfPlane, PropagationOptions, SweepBounds};
use rf_coverage::geo::Site;
use rf_coverage::io::LinkParams;
use rf_coverage::models::{Environment, ModelCode};
use rf_coverage::output::CoverageMap;
use rf_coverage::terrain::TileStore;

fn sweep_benchmark(c: &mut Criterion) {
    // Synthesized sea-level terrain at a coarse grid keeps the bench
    // self-contained and stable across machines.
    let store = TileStore::with_resolution(None, 300);
    store.load_area(45, 45, 5, 5).unwrap();

    let source = Site::new(45.5, 5.5, 150.0);
    let params = LinkParams {
        frq_mhz: 900.0,
        max_range: 10.0,
        ..LinkParams::default()
    };
    let bounds = SweepBounds::around(&source, params.max_range);

    c.bench_function("los_sweep_sequential", |b| {
        b.iter(|| {
            let mut sweep = CoverageSweep::new(&store, bounds, &params);
            let mut map = CoverageMap::new(&store);
            sweep.plot_los(black_box(&source), 30.0, false, &mut map);
            map
        })
    });

    c.bench_function("los_sweep_parallel", |b| {
        b.iter(|| {
            let mut sweep = CoverageSweep::new(&store, bounds, &params);
            let mut map = CoverageMap::new(&store);
            sweep.plot_los(black_box(&source), 30.0, true, &mut map);
            map
        })
    });

    c.bench_function("fspl_sweep_sequential", |b| {
        let options = PropagationOptions {
            model: ModelCode::Fspl,
            environment: Environment::Urban,
            knife_edge: false,
            point_to_point: None,
        };
        b.iter(|| {
            let mut sweep = CoverageSweep::new(&store, bounds, &params);
            let mut map = CoverageMap::new(&store);
            sweep
                .plot_propagation(
                    black_box(&source),
                    30.0,
                    &options,
                    HalfPlane::Both,
                    false,
                    &mut map,
                )
                .unwrap();
            map
        })
    });
}

criterion_group!(benches, sweep_benchmark);
criterion_main!(benches);
