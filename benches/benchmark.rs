use criterion::{criterion_group, criterion_main, Criterion};
use layered_image::config::default_layer_specs;
use layered_image::engine::analyzer::analyze;
use layered_image::engine::compositor::composite;
use layered_image::engine::{encode_pixels, LayerStore, PixelBuffer};
use layered_image::OutputFormat;
use std::hint::black_box;

fn photo_like(width: u32, height: u32) -> PixelBuffer {
    PixelBuffer::from_fn(width, height, |x, y| {
        let smooth = ((x + y) / 8) as u8;
        let noise = ((x.wrapping_mul(2654435761) ^ y.wrapping_mul(40503)) >> 7) as u8;
        if (x / 64 + y / 64) % 2 == 0 {
            [smooth, smooth, smooth, 255]
        } else {
            [noise, smooth, noise / 2, 255]
        }
    })
    .expect("bench image")
}

fn analyzed(pixels: &PixelBuffer) -> LayerStore {
    let mut store = LayerStore::from_specs(&default_layer_specs(), OutputFormat::Jpeg)
        .expect("default layers");
    analyze(pixels, &mut store);
    store
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let pixels = photo_like(1024, 768);

    c.bench_function("analyze 1024x768", |b| {
        b.iter(|| analyzed(black_box(&pixels)))
    });

    let store = analyzed(&pixels);
    let decoded: Vec<Option<PixelBuffer>> = (0..store.len()).map(|_| Some(pixels.clone())).collect();
    c.bench_function("composite 1024x768", |b| {
        b.iter(|| composite(1024, 768, black_box(store.layers()), black_box(&decoded)))
    });

    let small = photo_like(256, 256);
    let mut group = c.benchmark_group("layer encode 256x256");
    for spec in default_layer_specs() {
        group.bench_function(format!("jpeg q{}", spec.quality), |b| {
            b.iter(|| encode_pixels(black_box(&small), OutputFormat::Jpeg, spec.quality))
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
