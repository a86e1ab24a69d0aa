#![allow(dead_code)]

use archetype_assets::asset::audio::{AudioFormat, AudioHeader, AUDIO_SERIALIZED_VERSION, AUDIO_TYPE_NAME};
use archetype_assets::asset::texture::{
    PixelFormat, TextureFlags, TextureHeader, TextureHeaderV1, TEXTURE_SERIALIZED_VERSION,
    TEXTURE_TYPE_NAME,
};
use archetype_assets::{
    AssetConfig, AssetId, AssetRuntime, Backends, ContainerData, FactoryRegistry, InlineExecutor,
    MemoryBackend, ThreadPoolExecutor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestRuntime {
    pub runtime: AssetRuntime,
    pub textures: Arc<MemoryBackend>,
    pub audio: Arc<MemoryBackend>,
    pub dir: TempDir,
}

impl TestRuntime {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `data` into the test directory and index it
    pub fn install(&self, name: &str, data: &ContainerData) -> PathBuf {
        let path = self.path(name);
        data.save(&path).unwrap();
        self.runtime.manager().index().register_path(&path).unwrap();
        path
    }
}

fn build(config: AssetConfig, textures: MemoryBackend, threads: Option<usize>) -> TestRuntime {
    let textures = Arc::new(textures);
    let audio = Arc::new(MemoryBackend::new("audio"));
    let executor: Arc<dyn archetype_assets::TaskExecutor> = match threads {
        Some(threads) => Arc::new(ThreadPoolExecutor::new(threads).unwrap()),
        None => Arc::new(InlineExecutor),
    };
    let runtime = AssetRuntime::init_with(
        config,
        Backends::new(textures.clone(), audio.clone()),
        FactoryRegistry::builtin(),
        executor,
    )
    .unwrap();
    TestRuntime {
        runtime,
        textures,
        audio,
        dir: tempfile::tempdir().unwrap(),
    }
}

/// Every job runs on the calling thread
pub fn inline_runtime(config: AssetConfig) -> TestRuntime {
    build(config, MemoryBackend::new("texture"), None)
}

/// Worker pool with texture uploads slowed by `write_delay`
pub fn pooled_runtime(config: AssetConfig, threads: usize, write_delay: Duration) -> TestRuntime {
    build(
        config,
        MemoryBackend::new("texture").with_write_delay(write_delay),
        Some(threads),
    )
}

pub fn texture_header(width: u32, height: u32, mips: u32, streamable: bool) -> TextureHeader {
    let flags = if streamable {
        TextureFlags::STREAMABLE
    } else {
        TextureFlags::empty()
    };
    TextureHeader::new(PixelFormat::Rgba8, width, height, mips).with_flags(flags)
}

/// Current-version texture container, mip `n` filled with byte `n + 1`
pub fn texture_container(id: AssetId, header: &TextureHeader) -> ContainerData {
    let mut data = ContainerData::new(id, TEXTURE_TYPE_NAME, TEXTURE_SERIALIZED_VERSION)
        .with_custom_data(header.to_bytes().unwrap());
    for level in 0..header.mip_levels {
        let size = header.mip_byte_size(level).unwrap();
        data = data.with_chunk(level as usize, vec![level as u8 + 1; size]);
    }
    data
}

/// 512x512 RGBA8 texture with its full chain of 10 mips
pub fn large_texture(id: AssetId, streamable: bool) -> ContainerData {
    texture_container(id, &texture_header(512, 512, 10, streamable))
}

/// Texture written before array size and flags existed
pub fn texture_container_v1(id: AssetId, width: u32, height: u32, mips: u32) -> ContainerData {
    let v1 = TextureHeaderV1 {
        format: PixelFormat::Rgba8,
        width,
        height,
        mip_levels: mips,
    };
    let layout = TextureHeader::new(PixelFormat::Rgba8, width, height, mips);
    let mut data = ContainerData::new(id, TEXTURE_TYPE_NAME, 1).with_custom_data(v1.to_bytes().unwrap());
    for level in 0..mips {
        let size = layout.mip_byte_size(level).unwrap();
        data = data.with_chunk(level as usize, vec![0x40 + level as u8; size]);
    }
    data
}

/// Mono PCM16 clip at 1 kHz, one second per buffer
pub fn audio_clip(id: AssetId, buffers: usize, streamable: bool) -> ContainerData {
    let header = AudioHeader::new(AudioFormat::Pcm16, 1000, 1, vec![1000; buffers]).streamable(streamable);
    let mut data = ContainerData::new(id, AUDIO_TYPE_NAME, AUDIO_SERIALIZED_VERSION)
        .with_custom_data(header.to_bytes().unwrap());
    for index in 0..buffers {
        let size = header.stored_chunk_size(index).unwrap();
        data = data.with_chunk(index, vec![index as u8; size]);
    }
    data
}

pub fn backup_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.to_string_lossy().contains(".bak."))
        .collect()
}
