use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use face_composer::adjust::{AdjustmentStep, Direction, Magnitude, PartTarget, TargetedStep};
use face_composer::compose::Compositor;
use face_composer::config::PlacementConfig;
use face_composer::placement::{PlacementSet, build_instances};
use face_composer::selection::Selection;
use face_composer::theme::Theme;
use face_composer::PartCategory;
use image::{Rgba, RgbaImage};
use std::hint::black_box;
use std::path::Path;

fn write_part(dir: &Path, name: &str, size: u32) -> std::path::PathBuf {
    let mut img = RgbaImage::new(size, size);
    for (x, y, px) in img.enumerate_pixels_mut() {
        let alpha = if (x + y) % 7 == 0 { 0 } else { 220 };
        *px = Rgba([(x % 256) as u8, (y % 256) as u8, 128, alpha]);
    }
    let path = dir.join(format!("{name}.png"));
    img.save(&path).expect("write bench asset");
    path
}

fn full_face(dir: &Path) -> Vec<Selection> {
    PartCategory::ALL
        .iter()
        .map(|category| {
            let size = match category {
                PartCategory::Outline | PartCategory::Hair | PartCategory::FaceShape => 400,
                _ => 200,
            };
            Selection::new(*category, write_part(dir, category.name(), size))
        })
        .collect()
}

fn bench_compose(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let selections = full_face(dir.path());
    let config = PlacementConfig::default();
    let placements = PlacementSet::for_selections(&config, &selections);

    let mut group = c.benchmark_group("compose");
    for canvas in [256u32, 400, 800] {
        let compositor = Compositor::new(canvas, &Theme::classic());
        // Warm the asset cache so the loop measures resampling and blending.
        let _ = compositor.compose_selections(&selections, &placements);
        group.bench_with_input(BenchmarkId::from_parameter(canvas), &canvas, |b, _| {
            b.iter(|| {
                let composite = compositor
                    .compose_selections(black_box(&selections), black_box(&placements))
                    .expect("compose");
                black_box(composite);
            })
        });
    }
    group.finish();
}

fn bench_adjust_and_resolve(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let selections = full_face(dir.path());
    let placements = PlacementSet::for_selections(&PlacementConfig::default(), &selections);
    let steps: Vec<TargetedStep> = PartCategory::ALL
        .iter()
        .map(|category| {
            TargetedStep::new(
                PartTarget::category(*category),
                AdjustmentStep::moved(Direction::Up, Magnitude::Slight),
            )
        })
        .collect();

    c.bench_function("apply_and_resolve", |b| {
        b.iter(|| {
            let next = placements.apply(black_box(&steps));
            let instances = build_instances(&selections, &next, 400).expect("instances");
            black_box(instances);
        })
    });
}

criterion_group!(benches, bench_compose, bench_adjust_and_resolve);
criterion_main!(benches);
