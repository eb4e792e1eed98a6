use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use rusty_hss::{DenseKernel, HssMatrix, HssOptions};

fn gaussian_kernel_matrix(n: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, n), |(i, j)| {
        let x = i as f64 / n as f64;
        let y = j as f64 / n as f64;
        (-16.0 * (x - y) * (x - y)).exp()
    })
}

fn bench_compression(c: &mut Criterion) {
    let n = 512;
    let mat = gaussian_kernel_matrix(n);
    let opts = HssOptions::default()
        .with_leaf_size(64)
        .with_d0(32)
        .with_rel_tol(1e-6)
        .with_max_rank(128);

    c.bench_function("compress gaussian kernel 512", |b| {
        b.iter(|| {
            let kernel = DenseKernel::new(mat.view());
            let mut hss = HssMatrix::<f64>::new(n, &opts);
            hss.compress(&kernel, &opts).unwrap();
            hss
        })
    });
}

criterion_group!(benches, bench_compression);
criterion_main!(benches);
