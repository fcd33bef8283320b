//! Query throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use visual_index::{BuildOptions, Descriptors, FeatureGeometry, IndexOptions, QueryOptions, VisualIndex};

const DIM: usize = 32;

fn random_descriptors(rng: &mut StdRng, n: usize) -> Descriptors {
    let data: Vec<u8> = (0..n * DIM).map(|_| rng.gen()).collect();
    Descriptors::new(data, DIM).unwrap()
}

fn geometries(n: usize) -> Vec<FeatureGeometry> {
    (0..n)
        .map(|i| FeatureGeometry::new(i as f32, i as f32, 1.0, 0.0))
        .collect()
}

fn populated_index(rng: &mut StdRng, num_images: usize) -> VisualIndex {
    let mut index = VisualIndex::new();
    let options = BuildOptions {
        num_visual_words: 64,
        branching: 8,
        num_iterations: 5,
        ..BuildOptions::default()
    };
    index.build(&options, &random_descriptors(rng, 1024)).unwrap();

    for image_id in 0..num_images as u32 {
        let descriptors = random_descriptors(rng, 128);
        index
            .add(
                &IndexOptions::default(),
                image_id,
                &geometries(descriptors.len()),
                &descriptors,
            )
            .unwrap();
    }
    index.prepare().unwrap();
    index
}

fn benchmark_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let mut rng = StdRng::seed_from_u64(99);

    for num_images in [10usize, 100] {
        let index = populated_index(&mut rng, num_images);
        let query = random_descriptors(&mut rng, 128);

        group.bench_with_input(
            BenchmarkId::from_parameter(num_images),
            &num_images,
            |b, _| {
                b.iter(|| {
                    index
                        .query(&QueryOptions::default(), black_box(&query))
                        .unwrap()
                })
            },
        );
    }
    group.finish();
}

fn benchmark_add(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let mut index = VisualIndex::new();
    let options = BuildOptions {
        num_visual_words: 64,
        branching: 8,
        num_iterations: 5,
        ..BuildOptions::default()
    };
    index.build(&options, &random_descriptors(&mut rng, 1024)).unwrap();

    let descriptors = random_descriptors(&mut rng, 128);
    let geoms = geometries(descriptors.len());

    let mut next_image_id = 0u32;
    c.bench_function("add_128_descriptors", |b| {
        b.iter(|| {
            index
                .add(
                    &IndexOptions::default(),
                    next_image_id,
                    black_box(&geoms),
                    black_box(&descriptors),
                )
                .unwrap();
            next_image_id += 1;
        })
    });
}

criterion_group!(benches, benchmark_query, benchmark_add);
criterion_main!(benches);
