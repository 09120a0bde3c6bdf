use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use hdr_core::PixelBuffer;
use hdr_core::filters::{
    GradDomParams, HistEqParams, ReinhardGlobalParams, ReinhardLocalParams, grad_dom, hist_eq,
    reinhard_global, reinhard_local,
};

fn test_image(width: u32, height: u32) -> PixelBuffer {
    let mut buf = PixelBuffer::new(width, height);
    let w = width as usize;
    for (i, px) in buf.data.chunks_exact_mut(4).enumerate() {
        let (x, y) = ((i % w) as f32 / width as f32, (i / w) as f32 / height as f32);
        px.copy_from_slice(&[x, y, (x * y).sqrt(), 1.0]);
    }
    buf
}

fn bench_tone_mappers(c: &mut Criterion) {
    let input = test_image(300, 300);
    let mut group = c.benchmark_group("300x300");

    let params = HistEqParams::default();
    group.bench_function("hist_eq/reference", |b| {
        b.iter(|| hist_eq::reference(black_box(&input), &params))
    });
    group.bench_function("hist_eq/parallel", |b| {
        b.iter(|| hist_eq::parallel(black_box(&input), &params, 256))
    });

    let params = ReinhardGlobalParams::default();
    group.bench_function("reinhard_global/reference", |b| {
        b.iter(|| reinhard_global::reference(black_box(&input), &params))
    });
    group.bench_function("reinhard_global/parallel", |b| {
        b.iter(|| reinhard_global::parallel(black_box(&input), &params, 256))
    });

    let params = ReinhardLocalParams::default();
    group.bench_function("reinhard_local/reference", |b| {
        b.iter(|| reinhard_local::reference(black_box(&input), &params))
    });
    group.bench_function("reinhard_local/parallel", |b| {
        b.iter(|| reinhard_local::parallel(black_box(&input), &params, 256))
    });

    let params = GradDomParams::default();
    group.sample_size(10);
    group.bench_function("grad_dom/reference", |b| {
        b.iter(|| grad_dom::reference(black_box(&input), &params))
    });
    group.bench_function("grad_dom/parallel", |b| {
        b.iter(|| grad_dom::parallel(black_box(&input), &params, 256))
    });
    group.finish();
}

criterion_group!(benches, bench_tone_mappers);
criterion_main!(benches);
