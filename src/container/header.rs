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

//! Container preamble parsing and serialization

use super::{
    ChunkFlags, ContainerFlags, CHUNK_ENTRY_SIZE, FORMAT_VERSION, MAGIC, MAX_CHUNKS,
    MAX_CUSTOM_DATA_LEN, MAX_DEPENDENCIES, MAX_METADATA_LEN, MAX_TYPE_NAME_LEN,
};
use crate::error::{AssetError, Result};
use crate::id::{AssetId, TypeName};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// magic + format version + flags + id + type name length
const FIXED_PREFIX_LEN: usize = 4 + 4 + 4 + 16 + 2;

/// Location of one chunk payload inside the container
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub offset: u64,
    pub size: u32,
    pub flags: ChunkFlags,
}

impl ChunkDescriptor {
    pub const ABSENT: ChunkDescriptor = ChunkDescriptor {
        offset: 0,
        size: 0,
        flags: ChunkFlags::empty(),
    };

    pub fn new(offset: u64, size: u32) -> Self {
        Self {
            offset,
            size,
            flags: ChunkFlags::empty(),
        }
    }

    /// Size zero marks an absent chunk
    pub fn is_present(&self) -> bool {
        self.size != 0
    }

    pub fn end(&self) -> u64 {
        self.offset.saturating_add(u64::from(self.size))
    }
}

/// Parsed container preamble
#[derive(Clone, Debug, PartialEq)]
pub struct AssetHeader {
    pub id: AssetId,
    pub type_name: TypeName,
    pub serialized_version: u32,
    /// Type-specific header bytes, opaque to the container layer
    pub custom_data: Vec<u8>,
    pub chunks: [ChunkDescriptor; MAX_CHUNKS],
    pub metadata: Option<Vec<u8>>,
    pub dependencies: Vec<AssetId>,
}

fn truncated(err: io::Error) -> AssetError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        AssetError::BadFormat("truncated container preamble".into())
    } else {
        AssetError::from(err)
    }
}

fn check_remaining(file_len: Option<u64>, consumed: usize, needed: usize) -> Result<()> {
    match file_len {
        Some(len) if consumed as u64 + needed as u64 > len => Err(AssetError::BadFormat(format!(
            "declared length {needed} at offset {consumed} exceeds file size {len}"
        ))),
        _ => Ok(()),
    }
}

impl AssetHeader {
    pub fn new(id: AssetId, type_name: TypeName, serialized_version: u32) -> Self {
        Self {
            id,
            type_name,
            serialized_version,
            custom_data: Vec::new(),
            chunks: [ChunkDescriptor::ABSENT; MAX_CHUNKS],
            metadata: None,
            dependencies: Vec::new(),
        }
    }

    pub fn has_editor_data(&self) -> bool {
        self.metadata.is_some() || !self.dependencies.is_empty()
    }

    pub fn flags(&self) -> ContainerFlags {
        if self.has_editor_data() {
            ContainerFlags::HAS_EDITOR_DATA
        } else {
            ContainerFlags::empty()
        }
    }

    /// Read a preamble. With `file_len`, every declared length and chunk
    /// range is checked against the real size.
    pub fn read_from<R: Read>(reader: &mut R, file_len: Option<u64>) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(truncated)?;
        if magic != MAGIC {
            return Err(AssetError::BadFormat(format!("bad magic {magic:02x?}")));
        }

        let format_version = reader.read_u32::<LittleEndian>().map_err(truncated)?;
        if format_version == 0 || format_version > FORMAT_VERSION {
            return Err(AssetError::BadFormat(format!(
                "unsupported container format version {format_version}"
            )));
        }

        let raw_flags = reader.read_u32::<LittleEndian>().map_err(truncated)?;
        let flags = ContainerFlags::from_bits(raw_flags).ok_or_else(|| {
            AssetError::BadFormat(format!("unknown container flags {raw_flags:#x}"))
        })?;

        let mut id = [0u8; 16];
        reader.read_exact(&mut id).map_err(truncated)?;

        let name_len = reader.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        if name_len == 0 || name_len > MAX_TYPE_NAME_LEN {
            return Err(AssetError::BadFormat(format!(
                "type name length {name_len} out of range"
            )));
        }
        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name).map_err(truncated)?;
        let name = String::from_utf8(name)
            .map_err(|_| AssetError::BadFormat("type name is not valid UTF-8".into()))?;

        let serialized_version = reader.read_u32::<LittleEndian>().map_err(truncated)?;

        let custom_len = reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        if custom_len > MAX_CUSTOM_DATA_LEN {
            return Err(AssetError::BadFormat(format!(
                "custom data length {custom_len} exceeds limit"
            )));
        }
        let mut consumed = FIXED_PREFIX_LEN + name_len + 8;
        check_remaining(file_len, consumed, custom_len)?;
        let mut custom_data = vec![0u8; custom_len];
        reader.read_exact(&mut custom_data).map_err(truncated)?;
        consumed += custom_len;

        let mut chunks = [ChunkDescriptor::ABSENT; MAX_CHUNKS];
        for chunk in chunks.iter_mut() {
            let offset = reader.read_u64::<LittleEndian>().map_err(truncated)?;
            let size = reader.read_u32::<LittleEndian>().map_err(truncated)?;
            let flags = ChunkFlags::from_bits_retain(reader.read_u32::<LittleEndian>().map_err(truncated)?);
            *chunk = ChunkDescriptor {
                offset,
                size,
                flags,
            };
        }
        consumed += MAX_CHUNKS * CHUNK_ENTRY_SIZE;

        let (metadata, dependencies) = if flags.contains(ContainerFlags::HAS_EDITOR_DATA) {
            let meta_len = reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
            if meta_len > MAX_METADATA_LEN {
                return Err(AssetError::BadFormat(format!(
                    "metadata length {meta_len} exceeds limit"
                )));
            }
            consumed += 4;
            check_remaining(file_len, consumed, meta_len)?;
            let mut metadata = vec![0u8; meta_len];
            reader.read_exact(&mut metadata).map_err(truncated)?;
            consumed += meta_len;

            let count = reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
            if count > MAX_DEPENDENCIES {
                return Err(AssetError::BadFormat(format!(
                    "dependency count {count} exceeds limit"
                )));
            }
            consumed += 4;
            check_remaining(file_len, consumed, count * 16)?;
            let mut dependencies = Vec::with_capacity(count);
            for _ in 0..count {
                let mut dep = [0u8; 16];
                reader.read_exact(&mut dep).map_err(truncated)?;
                dependencies.push(AssetId::from_bytes(dep));
            }
            // Kept even when empty so the tail still counts toward the preamble
            (Some(metadata), dependencies)
        } else {
            (None, Vec::new())
        };

        let header = Self {
            id: AssetId::from_bytes(id),
            type_name: TypeName::new(&name),
            serialized_version,
            custom_data,
            chunks,
            metadata,
            dependencies,
        };
        if let Some(len) = file_len {
            header.validate_chunk_ranges(len)?;
        }
        Ok(header)
    }

    /// Parse a whole in-memory container
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        Self::read_from(&mut cursor, Some(bytes.len() as u64))
    }

    /// Every present chunk must sit after the preamble and inside the file
    pub fn validate_chunk_ranges(&self, file_len: u64) -> Result<()> {
        let preamble = self.encoded_len() as u64;
        for (index, chunk) in self.present_chunks() {
            if chunk.offset < preamble {
                return Err(AssetError::BadFormat(format!(
                    "chunk {index} at offset {} overlaps the preamble",
                    chunk.offset
                )));
            }
            if chunk.end() > file_len {
                return Err(AssetError::BadFormat(format!(
                    "chunk {index} ends at {} beyond file size {file_len}",
                    chunk.end()
                )));
            }
        }
        Ok(())
    }

    /// Size of the serialized preamble in bytes
    pub fn encoded_len(&self) -> usize {
        let mut len = FIXED_PREFIX_LEN
            + self.type_name.len()
            + 4
            + 4
            + self.custom_data.len()
            + MAX_CHUNKS * CHUNK_ENTRY_SIZE;
        if self.has_editor_data() {
            len += 4 + self.metadata.as_ref().map_or(0, Vec::len) + 4 + self.dependencies.len() * 16;
        }
        len
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let name = self.type_name.as_str().as_bytes();
        if name.is_empty() || name.len() > MAX_TYPE_NAME_LEN {
            return Err(AssetError::BadFormat(format!(
                "type name length {} out of range",
                name.len()
            )));
        }
        if self.custom_data.len() > MAX_CUSTOM_DATA_LEN {
            return Err(AssetError::BadFormat("custom data exceeds limit".into()));
        }

        writer.write_all(&MAGIC)?;
        writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        writer.write_u32::<LittleEndian>(self.flags().bits())?;
        writer.write_all(self.id.as_bytes())?;
        writer.write_u16::<LittleEndian>(name.len() as u16)?;
        writer.write_all(name)?;
        writer.write_u32::<LittleEndian>(self.serialized_version)?;
        writer.write_u32::<LittleEndian>(self.custom_data.len() as u32)?;
        writer.write_all(&self.custom_data)?;

        for chunk in &self.chunks {
            writer.write_u64::<LittleEndian>(chunk.offset)?;
            writer.write_u32::<LittleEndian>(chunk.size)?;
            writer.write_u32::<LittleEndian>(chunk.flags.bits())?;
        }

        if self.has_editor_data() {
            let metadata = self.metadata.as_deref().unwrap_or(&[]);
            if metadata.len() > MAX_METADATA_LEN || self.dependencies.len() > MAX_DEPENDENCIES {
                return Err(AssetError::BadFormat("editor data exceeds limit".into()));
            }
            writer.write_u32::<LittleEndian>(metadata.len() as u32)?;
            writer.write_all(metadata)?;
            writer.write_u32::<LittleEndian>(self.dependencies.len() as u32)?;
            for dep in &self.dependencies {
                writer.write_all(dep.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Descriptor of a present chunk
    pub fn chunk(&self, index: usize) -> Option<&ChunkDescriptor> {
        self.chunks.get(index).filter(|c| c.is_present())
    }

    pub fn has_chunk(&self, index: usize) -> bool {
        self.chunk(index).is_some()
    }

    pub fn present_chunks(&self) -> impl Iterator<Item = (usize, &ChunkDescriptor)> + '_ {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| chunk.is_present())
    }

    pub fn chunk_count(&self) -> usize {
        self.present_chunks().count()
    }

    pub fn payload_len(&self) -> u64 {
        self.present_chunks().map(|(_, c)| u64::from(c.size)).sum()
    }
}
