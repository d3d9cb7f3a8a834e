//! Benchmarks for pipeline building.

use clusterflow::api::MaintenanceTask;
use clusterflow::cluster::{admin_update_steps, install_steps};
use clusterflow::steps::describe;
use clusterflow::testing::cluster_record;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn pipeline_benchmark(c: &mut Criterion) {
    let everything = cluster_record("4.14.16", MaintenanceTask::Everything);
    let creating = cluster_record("4.14.16", MaintenanceTask::None);

    c.bench_function("admin_update_steps_everything", |b| {
        b.iter(|| admin_update_steps(black_box(&everything), black_box(true)))
    });

    c.bench_function("install_steps_bootstrap", |b| {
        b.iter(|| {
            install_steps(
                black_box(clusterflow::api::InstallPhase::Bootstrap),
                black_box(&creating),
                false,
            )
        })
    });

    c.bench_function("describe_admin_update", |b| {
        let steps = admin_update_steps(&everything, true).expect("valid record");
        b.iter(|| describe(black_box(&steps)))
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
