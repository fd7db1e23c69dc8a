use criterion::{criterion_group, criterion_main, Criterion, black_box};

use voxundo::core::types::{IVec3, UVec3};
use voxundo::host::MemoryWorld;
use voxundo::math::Orientation;
use voxundo::snapshot::RegionSnapshot;
use voxundo::voxel::{VoxelMask, VoxelRecord};

/// A cube of mostly stone with every third voxel left as air.
fn ruin_world(size: i32) -> MemoryWorld {
    let mut world = MemoryWorld::new((-64, 64));
    for x in 0..size {
        for y in 0..size {
            for z in 0..size {
                if (x + y + z) % 3 != 0 {
                    world.set_voxel(IVec3::new(x, y, z), VoxelRecord::new(1 + (x % 4) as u16, 0));
                }
            }
        }
    }
    world
}

fn sphere_mask(size: u32) -> VoxelMask {
    let mut mask = VoxelMask::new(UVec3::splat(size)).unwrap();
    let center = size as f32 / 2.0;
    for x in 0..size as i32 {
        for y in 0..size as i32 {
            for z in 0..size as i32 {
                let d = glam::Vec3::new(x as f32, y as f32, z as f32) + 0.5 - center;
                if d.length() <= center {
                    mask.set(IVec3::new(x, y, z));
                }
            }
        }
    }
    mask
}

fn bench_capture_32(c: &mut Criterion) {
    let mut world = ruin_world(32);
    let mask = VoxelMask::filled(UVec3::splat(32)).unwrap();

    c.bench_function("capture_32", |b| {
        b.iter(|| {
            RegionSnapshot::capture(&mut world, black_box(&mask), IVec3::ZERO, Orientation::IDENTITY).unwrap()
        });
    });
}

fn bench_capture_sparse_sphere_32(c: &mut Criterion) {
    let mut world = ruin_world(32);
    let mask = sphere_mask(32);

    c.bench_function("capture_sparse_sphere_32", |b| {
        b.iter(|| {
            RegionSnapshot::capture(&mut world, black_box(&mask), IVec3::ZERO, Orientation::new(1, false)).unwrap()
        });
    });
}

fn bench_apply_rotated_32(c: &mut Criterion) {
    let mut world = ruin_world(32);
    let mask = VoxelMask::filled(UVec3::splat(32)).unwrap();
    let snapshot = RegionSnapshot::capture(&mut world, &mask, IVec3::ZERO, Orientation::IDENTITY).unwrap();

    c.bench_function("apply_rotated_32", |b| {
        b.iter(|| {
            snapshot
                .apply(&mut world, black_box(IVec3::new(40, 0, 0)), None, Orientation::new(3, true))
                .unwrap()
        });
    });
}

fn bench_mask_reorient_64(c: &mut Criterion) {
    let mask = sphere_mask(64);

    c.bench_function("mask_reorient_64", |b| {
        b.iter(|| mask.reoriented_with_border(black_box(Orientation::new(1, true)), 1).unwrap());
    });
}

fn bench_border_mask_64(c: &mut Criterion) {
    let mask = sphere_mask(64);

    c.bench_function("border_mask_64", |b| {
        b.iter(|| black_box(&mask).derive_border_mask());
    });
}

criterion_group!(
    benches,
    bench_capture_32,
    bench_capture_sparse_sphere_32,
    bench_apply_rotated_32,
    bench_mask_reorient_64,
    bench_border_mask_64,
);
criterion_main!(benches);
