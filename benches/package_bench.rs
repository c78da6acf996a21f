use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use herald::core::package::{Destination, Package};
use herald::protocol::handshake::{identify_message, verify_identify};
use serde_json::json;
use uuid::Uuid;

fn bench_package_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("package_wire");
    let packages = vec![
        Package::new(json!("hi"), Uuid::new_v4().to_string(), "*"),
        Package::new(json!({"type": "ping"}), Uuid::new_v4().to_string(), "<server>"),
        Package::new(json!({"blob": "a".repeat(1024)}), "src", Uuid::new_v4())
            .with_conv_ids(Some("conv".into()), None),
    ];

    group.bench_function("to_wire", |b| {
        b.iter_batched(
            || packages.clone(),
            |pkgs| {
                for p in pkgs {
                    let _ = p.to_wire().unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });

    let blob = packages[2].to_wire().unwrap();
    group.bench_function("from_wire", |b| {
        b.iter(|| {
            let _ = Package::from_wire(black_box(blob.as_bytes())).unwrap();
        })
    });

    group.finish();
}

fn bench_addressing(c: &mut Criterion) {
    let nid = Uuid::new_v4().to_string();
    c.bench_function("destination_parse", |b| {
        b.iter(|| {
            for raw in ["*", "<server>", nid.as_str(), "mobile"] {
                black_box(Destination::from(black_box(raw)));
            }
        })
    });

    let line = identify_message(Uuid::new_v4(), "desktop", "s3cret");
    c.bench_function("verify_identify", |b| {
        b.iter(|| verify_identify(black_box(&line), "s3cret").unwrap())
    });
}

criterion_group!(benches, bench_package_wire, bench_addressing);
criterion_main!(benches);
