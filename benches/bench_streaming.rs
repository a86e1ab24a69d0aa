use archetype_assets::asset::texture::{
    PixelFormat, TextureFlags, TextureHeader, TEXTURE_SERIALIZED_VERSION, TEXTURE_TYPE_NAME,
};
use archetype_assets::streaming::{plan_queue, ResidencyOrder};
use archetype_assets::{
    AssetConfig, AssetHandle, AssetId, AssetRuntime, Backends, ChunkMask, ContainerData,
    FactoryRegistry, InlineExecutor, UsageHint,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;

fn bench_plan_queue(c: &mut Criterion) {
    let current = ChunkMask::suffix(12, 4);
    let target = ChunkMask::suffix(12, 10);
    c.bench_function("plan_queue_grow", |b| {
        b.iter(|| {
            plan_queue(
                black_box(current),
                black_box(current),
                black_box(target),
                ResidencyOrder::CoarseFirst,
                12,
            )
        })
    });
}

fn setup(count: usize) -> (AssetRuntime, Vec<AssetHandle>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let runtime = AssetRuntime::init_with(
        AssetConfig::default(),
        Backends::headless(),
        FactoryRegistry::builtin(),
        Arc::new(InlineExecutor),
    )
    .unwrap();

    let header = TextureHeader::new(PixelFormat::Rgba8, 64, 64, 7).with_flags(TextureFlags::STREAMABLE);
    let handles = (0..count)
        .map(|i| {
            let mut data = ContainerData::new(AssetId::generate(), TEXTURE_TYPE_NAME, TEXTURE_SERIALIZED_VERSION)
                .with_custom_data(header.to_bytes().unwrap());
            for level in 0..7 {
                data = data.with_chunk(level, vec![0u8; header.mip_byte_size(level as u32).unwrap()]);
            }
            let path = dir.path().join(format!("tex_{i}.sbac"));
            data.save(&path).unwrap();
            runtime.manager().get_or_load_path(&path).unwrap()
        })
        .collect();
    (runtime, handles, dir)
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("streaming_update");

    let (runtime, handles, _dir) = setup(256);
    for handle in &handles {
        runtime.set_usage(handle.id(), UsageHint::Pinned);
    }
    runtime.update();
    group.bench_function("steady_256", |b| b.iter(|| black_box(runtime.update())));

    let mut quality = 0.0f32;
    group.bench_function("oscillate_256", |b| {
        b.iter(|| {
            quality = if quality > 0.5 { 0.25 } else { 1.0 };
            for handle in &handles {
                runtime.set_usage(handle.id(), UsageHint::visible(quality));
            }
            black_box(runtime.update())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_plan_queue, bench_update);
criterion_main!(benches);
