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

//! Mip-chained textures
//!
//! Chunk `i` holds mip level `i`, level 0 being the finest. Streaming keeps
//! the K coarsest levels resident.

use super::{AssetKind, AssetPayload, LoadContext, LoadOutcome};
use crate::backend::{MipLayout, SlotDesc};
use crate::container::{AssetHeader, MAX_CHUNKS};
use crate::error::{AssetError, Result};
use crate::upgrade::{Migration, MigrationContext, Upgrader};
use bitflags::bitflags;
use glam::UVec2;
use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};
use std::sync::Arc;

pub const TEXTURE_TYPE_NAME: &str = "Texture";
pub const TEXTURE_SERIALIZED_VERSION: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Readable, Writable)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgba8,
    Rgba16F,
    Rgba32F,
    Bc1,
    Bc3,
    Bc4,
    Bc5,
    Bc7,
}

impl PixelFormat {
    /// Edge length of a compression block in pixels
    pub fn block_dim(self) -> u32 {
        if self.is_compressed() {
            4
        } else {
            1
        }
    }

    pub fn bytes_per_block(self) -> u32 {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::Rg8 => 2,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgba16F => 8,
            PixelFormat::Rgba32F => 16,
            PixelFormat::Bc1 | PixelFormat::Bc4 => 8,
            PixelFormat::Bc3 | PixelFormat::Bc5 | PixelFormat::Bc7 => 16,
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            PixelFormat::Bc1 | PixelFormat::Bc3 | PixelFormat::Bc4 | PixelFormat::Bc5 | PixelFormat::Bc7
        )
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TextureFlags: u32 {
        /// Mips stream in by usage instead of loading with the asset
        const STREAMABLE = 1 << 0;
        const SRGB = 1 << 1;
    }
}

/// Type-specific header stored in the container's custom data
#[derive(Clone, Debug, PartialEq, Eq, Readable, Writable)]
pub struct TextureHeader {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub array_size: u32,
    pub flags: u32,
}

/// Number of levels in a full chain down to 1x1
pub fn full_mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

fn decode_exact<'a, T>(bytes: &'a [u8]) -> Result<T>
where
    T: Readable<'a, speedy::LittleEndian> + Writable<speedy::LittleEndian>,
{
    let value = T::read_from_buffer(bytes)?;
    let expected = value.bytes_needed()?;
    if expected != bytes.len() {
        return Err(AssetError::BadCustomData(format!(
            "expected {expected} header bytes, found {}",
            bytes.len()
        )));
    }
    Ok(value)
}

impl TextureHeader {
    pub fn new(format: PixelFormat, width: u32, height: u32, mip_levels: u32) -> Self {
        Self {
            format,
            width,
            height,
            mip_levels,
            array_size: 1,
            flags: TextureFlags::empty().bits(),
        }
    }

    pub fn with_flags(mut self, flags: TextureFlags) -> Self {
        self.flags = flags.bits();
        self
    }

    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size;
        self
    }

    pub fn texture_flags(&self) -> TextureFlags {
        TextureFlags::from_bits_retain(self.flags)
    }

    pub fn is_streamable(&self) -> bool {
        self.texture_flags().contains(TextureFlags::STREAMABLE) && self.mip_levels > 1
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.write_to_vec()?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode_exact(bytes)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(AssetError::BadCustomData(msg));
        if self.width == 0 || self.height == 0 {
            return bad(format!("texture size {}x{}", self.width, self.height));
        }
        if self.array_size == 0 {
            return bad("array size must be at least 1".into());
        }
        let max_levels = full_mip_count(self.width, self.height).min(MAX_CHUNKS as u32);
        if self.mip_levels == 0 || self.mip_levels > max_levels {
            return bad(format!(
                "{} mip levels, allowed 1..={max_levels}",
                self.mip_levels
            ));
        }
        if TextureFlags::from_bits(self.flags).is_none() {
            return bad(format!("unknown texture flags {:#x}", self.flags));
        }
        Ok(())
    }

    pub fn mip_layout(&self, level: u32) -> Result<MipLayout> {
        if level >= self.mip_levels {
            return Err(AssetError::chunk_missing(level as usize, "no such mip level"));
        }
        let size = UVec2::new(
            self.width.checked_shr(level).unwrap_or(0),
            self.height.checked_shr(level).unwrap_or(0),
        )
        .max(UVec2::ONE);
        let block = u64::from(self.format.block_dim());
        let blocks_x = u64::from(size.x).div_ceil(block);
        let blocks_y = u64::from(size.y).div_ceil(block);
        // A chunk size is stored as u32, so every mip must fit one
        let too_large = || {
            AssetError::BadCustomData(format!(
                "mip {level} of a {}x{}x{} {:?} texture exceeds {} bytes",
                self.width,
                self.height,
                self.array_size,
                self.format,
                u32::MAX
            ))
        };
        let pitch = blocks_x
            .checked_mul(u64::from(self.format.bytes_per_block()))
            .ok_or_else(too_large)?;
        let slice_size = pitch.checked_mul(blocks_y).ok_or_else(too_large)?;
        let total = slice_size
            .checked_mul(u64::from(self.array_size))
            .ok_or_else(too_large)?;
        if total > u64::from(u32::MAX) {
            return Err(too_large());
        }
        Ok(MipLayout {
            level,
            width: size.x,
            height: size.y,
            pitch: u32::try_from(pitch).map_err(|_| too_large())?,
            slice_size: u32::try_from(slice_size).map_err(|_| too_large())?,
            array_size: self.array_size,
            format: self.format,
        })
    }

    /// Bytes the container must hold for mip `level`
    pub fn mip_byte_size(&self, level: u32) -> Result<usize> {
        Ok(self.mip_layout(level)?.byte_size())
    }
}

/// Version 1 header: no array size or flags
#[derive(Clone, Debug, PartialEq, Eq, Readable, Writable)]
pub struct TextureHeaderV1 {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

impl TextureHeaderV1 {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.write_to_vec()?)
    }
}

fn migrate_v1_to_v2(ctx: &mut MigrationContext<'_>) -> Result<()> {
    let old: TextureHeaderV1 = decode_exact(ctx.input_custom_data())?;
    let flags = if old.mip_levels > 1 {
        TextureFlags::STREAMABLE
    } else {
        TextureFlags::empty()
    };
    let new = TextureHeader::new(old.format, old.width, old.height, old.mip_levels).with_flags(flags);
    ctx.set_custom_data(new.to_bytes()?);
    for level in 0..old.mip_levels.min(MAX_CHUNKS as u32) as usize {
        ctx.copy_chunk(level, level)?;
    }
    Ok(())
}

pub fn texture_upgrader() -> Upgrader {
    Upgrader::new().with(Migration::new(1, 2, "texture_array_and_flags", migrate_v1_to_v2))
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    pub header: TextureHeader,
}

impl TextureData {
    pub(crate) fn slot_desc(&self, index: usize) -> Result<SlotDesc> {
        Ok(SlotDesc::TextureMip(self.header.mip_layout(index as u32)?))
    }

    pub(crate) fn decode_chunk(&self, index: usize, bytes: &Arc<[u8]>) -> Result<Arc<[u8]>> {
        let expected = self.header.mip_byte_size(index as u32)?;
        if bytes.len() != expected {
            return Err(AssetError::Decode(format!(
                "mip {index} holds {} bytes, layout needs {expected}",
                bytes.len()
            )));
        }
        Ok(Arc::clone(bytes))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TextureKind;

impl AssetKind for TextureKind {
    fn type_name(&self) -> &'static str {
        TEXTURE_TYPE_NAME
    }

    fn init(&self, header: &AssetHeader) -> Result<AssetPayload> {
        let texture = TextureHeader::from_bytes(&header.custom_data)?;
        texture.validate()?;
        for level in 0..texture.mip_levels {
            let expected = texture.mip_byte_size(level)?;
            let found = header.chunk(level as usize).map_or(0, |c| c.size as usize);
            if found != expected {
                return Err(AssetError::BadCustomData(format!(
                    "mip {level} chunk is {found} bytes, layout needs {expected}"
                )));
            }
        }
        Ok(AssetPayload::Texture(TextureData { header: texture }))
    }

    fn load(&self, ctx: &mut LoadContext<'_>) -> Result<LoadOutcome> {
        let streamable = ctx
            .payload()
            .as_texture()
            .is_some_and(|t| t.header.is_streamable());
        ctx.prepare_streaming()?;
        if streamable {
            return Ok(LoadOutcome::Streamable);
        }
        ctx.commit_all_chunks()?;
        Ok(LoadOutcome::Resident)
    }
}
