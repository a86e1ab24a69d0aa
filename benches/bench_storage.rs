use archetype_assets::asset::texture::{
    PixelFormat, TextureFlags, TextureHeader, TEXTURE_SERIALIZED_VERSION, TEXTURE_TYPE_NAME,
};
use archetype_assets::{AssetHeader, AssetId, ContainerData, Storage};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;

fn texture(mips: u32) -> ContainerData {
    let header = TextureHeader::new(PixelFormat::Rgba8, 1024, 1024, mips).with_flags(TextureFlags::STREAMABLE);
    let mut data = ContainerData::new(AssetId::generate(), TEXTURE_TYPE_NAME, TEXTURE_SERIALIZED_VERSION)
        .with_custom_data(header.to_bytes().unwrap());
    for level in 0..mips {
        let size = header.mip_byte_size(level).unwrap();
        data = data.with_chunk(level as usize, vec![level as u8; size]);
    }
    for _ in 0..16 {
        data = data.with_dependency(AssetId::generate());
    }
    data
}

fn bench_header(c: &mut Criterion) {
    let bytes = texture(11).to_bytes().unwrap();

    let mut group = c.benchmark_group("container_header");
    group.bench_function("parse", |b| {
        b.iter(|| AssetHeader::parse(black_box(&bytes)).unwrap())
    });
    group.bench_function("texture_header_decode", |b| {
        let custom = TextureHeader::new(PixelFormat::Bc7, 2048, 2048, 12).to_bytes().unwrap();
        b.iter(|| TextureHeader::from_bytes(black_box(&custom)).unwrap())
    });
    group.finish();
}

fn bench_chunks(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.sbac");
    texture(11).save(&path).unwrap();

    let mut group = c.benchmark_group("storage_chunks");
    group.sample_size(20);
    group.bench_function("open", |b| b.iter(|| Storage::open(black_box(&path)).unwrap()));
    group.bench_function("load_all_cold", |b| {
        b.iter_batched(
            || Storage::open(&path).unwrap(),
            |storage| storage.load_all_chunks().unwrap(),
            BatchSize::SmallInput,
        )
    });
    group.bench_function("load_chunk_cached", |b| {
        let storage = Storage::open(&path).unwrap();
        storage.load_chunk(0).unwrap();
        b.iter(|| storage.load_chunk(black_box(0)).unwrap())
    });
    group.finish();
}

fn bench_write(c: &mut Criterion) {
    let data = texture(11);
    let mut group = c.benchmark_group("container_write");
    group.sample_size(20);
    group.bench_function("to_bytes", |b| b.iter(|| black_box(&data).to_bytes().unwrap()));
    group.finish();
}

criterion_group!(benches, bench_header, bench_chunks, bench_write);
criterion_main!(benches);
