use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_kmscast::capture::{copy_region, Region};

pub fn benchmark_copy(c: &mut Criterion) {
    let dims = [
        (320, 240),
        (640, 480),
        (960, 540),
        (1920, 1080),
        (3840, 2160),
    ];
    let bpp = 4;
    // synthetic UHD framebuffer with the padded pitch drivers commonly report
    let (fb_width, fb_height) = (3840usize, 2160usize);
    let pitch = fb_width * bpp + 256;
    let fb = vec![0u8; pitch * fb_height];

    let mut group = c.benchmark_group("copy");
    for (width, height) in dims.iter() {
        let region = Region::new(0, 0, *width, *height);
        let mut dest = vec![0u8; region.size(bpp)];
        group.bench_with_input(format!("{width}x{height}"), &region, |b, region| {
            b.iter(|| copy_region(&fb, pitch, bpp, region, &mut dest))
        });
    }
}

criterion_group!(benches, benchmark_copy);
criterion_main!(benches);
