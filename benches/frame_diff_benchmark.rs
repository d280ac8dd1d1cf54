use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{Rgb, RgbImage};
use replay_vision::frames::{Thumbnail, difference_ratio};

fn screen(shift: u32) -> RgbImage {
    RgbImage::from_fn(1920, 1080, |x, y| {
        let v = ((x + shift) / 40 + y / 30) % 2;
        if v == 0 { Rgb([240, 240, 240]) } else { Rgb([30, 30, 30]) }
    })
}

fn benchmark_frame_diff(c: &mut Criterion) {
    let a = screen(0);
    let b = screen(7);

    c.bench_function("difference_ratio_1080p", |bench| {
        bench.iter(|| difference_ratio(black_box(&a), black_box(&b)))
    });

    let ta = Thumbnail::from_image(&a);
    let tb = Thumbnail::from_image(&b);
    c.bench_function("thumbnail_difference", |bench| {
        bench.iter(|| black_box(&ta).difference(black_box(&tb), 12))
    });
}

criterion_group!(benches, benchmark_frame_diff);
criterion_main!(benches);
