// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Chunked container storage
//!
//! A `Storage` owns one container. The preamble is read eagerly on open,
//! chunk payloads lazily on first request and then cached.

use crate::container::{AssetHeader, ChunkData, ChunkFlags, ContainerData, MAX_CHUNKS};
use crate::error::{AssetError, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Clone, Debug)]
enum ChunkSlot {
    /// Descriptor size is zero
    Absent,
    /// Present on disk, not read yet
    Missing,
    Cached(Arc<[u8]>),
}

enum Source {
    File { path: PathBuf, handle: Option<File> },
    Memory,
}

struct StorageInner {
    source: Source,
    header: Arc<AssetHeader>,
    slots: [ChunkSlot; MAX_CHUNKS],
    lock_count: usize,
}

/// Thread-safe chunk storage for a single container
pub struct Storage {
    path: Option<PathBuf>,
    inner: Mutex<StorageInner>,
    bytes_read: AtomicU64,
}

/// Keeps chunk bytes pinned until dropped
pub struct ChunkLock {
    storage: Arc<Storage>,
}

impl Drop for ChunkLock {
    fn drop(&mut self) {
        self.storage.unlock_chunks();
    }
}

fn slots_for(header: &AssetHeader) -> [ChunkSlot; MAX_CHUNKS] {
    std::array::from_fn(|index| {
        if header.has_chunk(index) {
            ChunkSlot::Missing
        } else {
            ChunkSlot::Absent
        }
    })
}

fn memory_slots(data: &ContainerData) -> [ChunkSlot; MAX_CHUNKS] {
    std::array::from_fn(|index| match data.chunk_data_at(index) {
        Some(chunk) => ChunkSlot::Cached(Arc::clone(&chunk.bytes)),
        None => ChunkSlot::Absent,
    })
}

fn open_file(path: &Path) -> Result<(File, AssetHeader)> {
    let file = File::open(path)
        .map_err(|e| AssetError::Io(format!("{}: {e}", path.display())))?;
    let file_len = file.metadata()?.len();
    let header = {
        let mut reader = BufReader::new(&file);
        AssetHeader::read_from(&mut reader, Some(file_len))?
    };
    Ok((file, header))
}

impl Storage {
    /// Open a container file and read its preamble
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let (file, header) = open_file(&path)?;
        debug!(
            path = %path.display(),
            id = %header.id,
            type_name = %header.type_name,
            version = header.serialized_version,
            "opened container"
        );
        let slots = slots_for(&header);
        Ok(Arc::new(Self {
            path: Some(path.clone()),
            inner: Mutex::new(StorageInner {
                source: Source::File {
                    path,
                    handle: Some(file),
                },
                header: Arc::new(header),
                slots,
                lock_count: 0,
            }),
            bytes_read: AtomicU64::new(0),
        }))
    }

    /// Storage over a container held entirely in memory
    pub fn from_memory(data: ContainerData) -> Result<Arc<Self>> {
        let header = data.header()?;
        Ok(Arc::new(Self {
            path: None,
            inner: Mutex::new(StorageInner {
                source: Source::Memory,
                header: Arc::new(header),
                slots: memory_slots(&data),
                lock_count: 0,
            }),
            bytes_read: AtomicU64::new(0),
        }))
    }

    pub fn header(&self) -> Arc<AssetHeader> {
        Arc::clone(&self.inner.lock().header)
    }

    /// Path the storage was opened from; kept after a swap to memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.inner.lock().source, Source::Memory)
    }

    pub fn has_chunk(&self, index: usize) -> bool {
        matches!(
            self.inner.lock().slots.get(index),
            Some(ChunkSlot::Missing | ChunkSlot::Cached(_))
        )
    }

    pub fn is_chunk_loaded(&self, index: usize) -> bool {
        matches!(self.inner.lock().slots.get(index), Some(ChunkSlot::Cached(_)))
    }

    pub fn chunk_size(&self, index: usize) -> u32 {
        self.inner
            .lock()
            .header
            .chunk(index)
            .map_or(0, |c| c.size)
    }

    /// Bytes of chunk `index`, reading them on first request.
    ///
    /// Idempotent: later calls return the cached bytes.
    pub fn load_chunk(&self, index: usize) -> Result<Arc<[u8]>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.slots.get(index) {
            None => return Err(AssetError::chunk_missing(index, "chunk index out of range")),
            Some(ChunkSlot::Absent) => {
                return Err(AssetError::chunk_missing(index, "chunk not present in container"))
            }
            Some(ChunkSlot::Cached(bytes)) => return Ok(Arc::clone(bytes)),
            Some(ChunkSlot::Missing) => {}
        }

        let descriptor = inner
            .header
            .chunk(index)
            .copied()
            .ok_or_else(|| AssetError::chunk_missing(index, "descriptor vanished"))?;
        let file = match &mut inner.source {
            Source::File { path, handle } => {
                if handle.is_none() {
                    trace!(path = %path.display(), "reopening container file");
                    *handle = Some(
                        File::open(&*path)
                            .map_err(|e| AssetError::Io(format!("{}: {e}", path.display())))?,
                    );
                }
                handle
                    .as_mut()
                    .ok_or_else(|| AssetError::Io("container handle unavailable".into()))?
            }
            Source::Memory => {
                return Err(AssetError::chunk_missing(index, "memory storage lost chunk bytes"))
            }
        };

        let mut bytes = vec![0u8; descriptor.size as usize];
        file.seek(SeekFrom::Start(descriptor.offset))?;
        file.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                AssetError::chunk_missing(index, "file shorter than chunk descriptor")
            } else {
                AssetError::from(e)
            }
        })?;

        self.bytes_read
            .fetch_add(u64::from(descriptor.size), Ordering::Relaxed);
        trace!(index, size = descriptor.size, "chunk read");
        let bytes: Arc<[u8]> = Arc::from(bytes);
        inner.slots[index] = ChunkSlot::Cached(Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Read every present chunk
    pub fn load_all_chunks(&self) -> Result<()> {
        let header = self.header();
        for (index, _) in header.present_chunks() {
            self.load_chunk(index)?;
        }
        Ok(())
    }

    /// Increment the pin counter. Pair with `unlock_chunks`.
    pub fn lock_chunks(&self) {
        self.inner.lock().lock_count += 1;
    }

    pub fn unlock_chunks(&self) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.lock_count > 0, "unbalanced unlock_chunks");
        inner.lock_count = inner.lock_count.saturating_sub(1);
    }

    /// Pin chunk bytes for the lifetime of the returned guard
    pub fn pin(self: &Arc<Self>) -> ChunkLock {
        self.lock_chunks();
        ChunkLock {
            storage: Arc::clone(self),
        }
    }

    pub fn lock_count(&self) -> usize {
        self.inner.lock().lock_count
    }

    /// Drop the OS file handle and unpinned cached bytes.
    ///
    /// Refused (returns `false`) while any pin is held. Memory storages keep
    /// their bytes.
    pub fn close_file_handles(&self) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.lock_count > 0 {
            return false;
        }
        if let Source::File { handle, .. } = &mut inner.source {
            *handle = None;
            for (index, slot) in inner.slots.iter_mut().enumerate() {
                let keep = inner
                    .header
                    .chunk(index)
                    .is_some_and(|c| c.flags.contains(ChunkFlags::KEEP_CACHED));
                if matches!(slot, ChunkSlot::Cached(_)) && !keep {
                    *slot = ChunkSlot::Missing;
                }
            }
        }
        true
    }

    /// Drop caches and re-read the preamble from disk
    pub fn reload(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let mut inner = self.inner.lock();
        if inner.lock_count > 0 {
            return Err(AssetError::InvalidState(
                "cannot reload storage while chunks are pinned".into(),
            ));
        }
        let (file, header) = open_file(path)?;
        inner.slots = slots_for(&header);
        inner.header = Arc::new(header);
        inner.source = Source::File {
            path: path.to_path_buf(),
            handle: Some(file),
        };
        debug!(path = %path.display(), "storage reloaded");
        Ok(())
    }

    /// Swap the backing to an in-memory container
    pub fn replace_contents(&self, data: ContainerData) -> Result<()> {
        let header = data.header()?;
        let mut inner = self.inner.lock();
        inner.slots = memory_slots(&data);
        inner.header = Arc::new(header);
        inner.source = Source::Memory;
        Ok(())
    }

    /// Snapshot of the whole container, reading any missing chunk
    pub fn to_container_data(&self) -> Result<ContainerData> {
        self.load_all_chunks()?;
        let header = self.header();
        let mut data = ContainerData::from_header(&header);
        for (index, descriptor) in header.present_chunks() {
            data.set_chunk_data(
                index,
                Some(ChunkData {
                    bytes: self.load_chunk(index)?,
                    flags: descriptor.flags,
                }),
            )?;
        }
        Ok(data)
    }

    /// Total bytes currently cached
    pub fn cached_bytes(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .map(|slot| match slot {
                ChunkSlot::Cached(bytes) => bytes.len(),
                _ => 0,
            })
            .sum()
    }

    /// Total bytes read from disk over the storage lifetime
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Storage")
            .field("path", &self.path)
            .field("id", &inner.header.id)
            .field("lock_count", &inner.lock_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::AssetId;
    use std::fs;

    fn write_sample(dir: &Path) -> PathBuf {
        let path = dir.join("sample.sbac");
        ContainerData::new(AssetId::from_u128(5), "Texture", 1)
            .with_chunk(0, vec![1u8; 32])
            .with_chunk(1, vec![2u8; 16])
            .with_chunk_flags(1, ChunkFlags::KEEP_CACHED)
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_load_chunk_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(write_sample(dir.path())).unwrap();
        assert!(!storage.is_chunk_loaded(0));
        let a = storage.load_chunk(0).unwrap();
        let b = storage.load_chunk(0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(&*a, &[1u8; 32][..]);
        assert_eq!(storage.bytes_read(), 32);
    }

    #[test]
    fn test_absent_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(write_sample(dir.path())).unwrap();
        let err = storage.load_chunk(5).unwrap_err();
        assert!(matches!(err, AssetError::ChunkMissing { index: 5, .. }));
    }

    #[test]
    fn test_short_file_at_read_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let storage = Storage::open(&path).unwrap();
        // Truncate after the preamble was validated
        let len = fs::metadata(&path).unwrap().len();
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 8).unwrap();
        let err = storage.load_chunk(1).unwrap_err();
        assert!(matches!(err, AssetError::ChunkMissing { index: 1, .. }));
    }

    #[test]
    fn test_close_file_handles_respects_pins() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(write_sample(dir.path())).unwrap();
        storage.load_all_chunks().unwrap();
        {
            let _pin = storage.pin();
            let _nested = storage.pin();
            assert_eq!(storage.lock_count(), 2);
            assert!(!storage.close_file_handles());
        }
        assert_eq!(storage.lock_count(), 0);
        assert!(storage.close_file_handles());
        assert!(!storage.is_chunk_loaded(0));
        // Flagged chunk survives
        assert!(storage.is_chunk_loaded(1));
        // And the data comes back on demand
        assert_eq!(&*storage.load_chunk(0).unwrap(), &[1u8; 32][..]);
    }

    #[test]
    fn test_memory_storage() {
        let data = ContainerData::new(AssetId::from_u128(1), "JsonData", 1).with_chunk(0, b"{}".to_vec());
        let storage = Storage::from_memory(data.clone()).unwrap();
        assert!(storage.is_memory());
        assert!(storage.close_file_handles());
        assert_eq!(&*storage.load_chunk(0).unwrap(), b"{}");
        assert_eq!(storage.to_container_data().unwrap(), data);
    }

    #[test]
    fn test_reload_picks_up_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let storage = Storage::open(&path).unwrap();
        storage.load_chunk(0).unwrap();

        ContainerData::new(AssetId::from_u128(5), "Texture", 2)
            .with_chunk(0, vec![7u8; 4])
            .save(&path)
            .unwrap();
        storage.reload().unwrap();
        assert_eq!(storage.header().serialized_version, 2);
        assert_eq!(&*storage.load_chunk(0).unwrap(), &[7u8; 4][..]);
    }
}
