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

//! In-memory container model and writer

use super::{AssetHeader, ChunkDescriptor, ChunkFlags, MAX_CHUNKS};
use crate::error::{AssetError, Result};
use crate::id::{AssetId, TypeName};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Payload bytes of one chunk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkData {
    pub bytes: Arc<[u8]>,
    pub flags: ChunkFlags,
}

/// A fully materialized container: preamble fields plus every chunk payload.
///
/// Used to author containers, as the upgrader's input/output, and as the
/// backing of memory storages.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerData {
    pub id: AssetId,
    pub type_name: TypeName,
    pub serialized_version: u32,
    pub custom_data: Vec<u8>,
    pub chunks: [Option<ChunkData>; MAX_CHUNKS],
    pub metadata: Option<Vec<u8>>,
    pub dependencies: Vec<AssetId>,
}

impl ContainerData {
    pub fn new(id: AssetId, type_name: impl Into<TypeName>, serialized_version: u32) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            serialized_version,
            custom_data: Vec::new(),
            chunks: std::array::from_fn(|_| None),
            metadata: None,
            dependencies: Vec::new(),
        }
    }

    /// Same preamble fields as `header`, no chunk payloads
    pub fn from_header(header: &AssetHeader) -> Self {
        Self {
            id: header.id,
            type_name: header.type_name.clone(),
            serialized_version: header.serialized_version,
            custom_data: header.custom_data.clone(),
            chunks: std::array::from_fn(|_| None),
            metadata: header.metadata.clone(),
            dependencies: header.dependencies.clone(),
        }
    }

    pub fn with_custom_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.custom_data = data.into();
        self
    }

    /// Panics if `index >= MAX_CHUNKS`
    pub fn with_chunk(mut self, index: usize, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.chunks[index] = Self::chunk_data(bytes.into(), ChunkFlags::empty());
        self
    }

    pub fn with_chunk_flags(mut self, index: usize, flags: ChunkFlags) -> Self {
        if let Some(Some(chunk)) = self.chunks.get_mut(index) {
            chunk.flags = flags;
        }
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = if metadata.is_empty() {
            None
        } else {
            Some(metadata)
        };
        self
    }

    pub fn with_dependency(mut self, dependency: AssetId) -> Self {
        self.dependencies.push(dependency);
        self
    }

    fn chunk_data(bytes: Arc<[u8]>, flags: ChunkFlags) -> Option<ChunkData> {
        // Zero-sized chunks are encoded as absent
        if bytes.is_empty() {
            None
        } else {
            Some(ChunkData { bytes, flags })
        }
    }

    pub fn set_chunk(&mut self, index: usize, bytes: impl Into<Arc<[u8]>>) -> Result<()> {
        let slot = self
            .chunks
            .get_mut(index)
            .ok_or_else(|| AssetError::chunk_missing(index, "chunk index out of range"))?;
        *slot = Self::chunk_data(bytes.into(), ChunkFlags::empty());
        Ok(())
    }

    pub fn set_chunk_data(&mut self, index: usize, data: Option<ChunkData>) -> Result<()> {
        let slot = self
            .chunks
            .get_mut(index)
            .ok_or_else(|| AssetError::chunk_missing(index, "chunk index out of range"))?;
        *slot = data.and_then(|d| Self::chunk_data(d.bytes, d.flags));
        Ok(())
    }

    pub fn clear_chunk(&mut self, index: usize) {
        if let Some(slot) = self.chunks.get_mut(index) {
            *slot = None;
        }
    }

    pub fn chunk(&self, index: usize) -> Option<&[u8]> {
        self.chunks.get(index)?.as_ref().map(|c| &*c.bytes)
    }

    pub fn chunk_data_at(&self, index: usize) -> Option<&ChunkData> {
        self.chunks.get(index)?.as_ref()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Preamble describing this container, payloads laid out back to back
    /// in chunk index order right after it
    pub fn header(&self) -> Result<AssetHeader> {
        let mut header = AssetHeader {
            id: self.id,
            type_name: self.type_name.clone(),
            serialized_version: self.serialized_version,
            custom_data: self.custom_data.clone(),
            chunks: [ChunkDescriptor::ABSENT; MAX_CHUNKS],
            metadata: self.metadata.clone(),
            dependencies: self.dependencies.clone(),
        };
        let mut offset = header.encoded_len() as u64;
        for (index, chunk) in self.chunks.iter().enumerate() {
            if let Some(chunk) = chunk {
                let size = u32::try_from(chunk.bytes.len()).map_err(|_| {
                    AssetError::BadFormat(format!("chunk {index} exceeds 4 GiB"))
                })?;
                header.chunks[index] = ChunkDescriptor {
                    offset,
                    size,
                    flags: chunk.flags,
                };
                offset += u64::from(size);
            }
        }
        Ok(header)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let header = self.header()?;
        header.write_to(writer)?;
        for chunk in self.chunks.iter().flatten() {
            writer.write_all(&chunk.bytes)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header = self.header()?;
        let mut out = Vec::with_capacity(header.encoded_len() + header.payload_len() as usize);
        header.write_to(&mut out)?;
        for chunk in self.chunks.iter().flatten() {
            out.extend_from_slice(&chunk.bytes);
        }
        Ok(out)
    }

    /// Write to `path` through a sibling temp file and a rename, so a crash
    /// never leaves a half-written container behind
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let bytes = self.to_bytes()?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        if let Err(err) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }
}
