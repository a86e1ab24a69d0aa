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

//! Resource backends
//!
//! A backend owns the native side of streamed chunks (GPU mip levels, audio
//! buffers). The asset system only ever sees opaque `SlotId`s.

pub mod memory;

pub use memory::MemoryBackend;

use crate::asset::audio::AudioDecoder;
use crate::asset::texture::PixelFormat;
use crate::error::Result;
use std::fmt;
use std::sync::Arc;

/// Opaque backend handle; `SlotId::NULL` marks a chunk with no slot
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct SlotId(u64);

impl SlotId {
    pub const NULL: SlotId = SlotId(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "SlotId(null)")
        } else {
            write!(f, "SlotId({:#x})", self.0)
        }
    }
}

/// Layout of one texture mip level as the backend receives it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MipLayout {
    pub level: u32,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of blocks
    pub pitch: u32,
    /// Bytes of one array slice at this level
    pub slice_size: u32,
    pub array_size: u32,
    pub format: PixelFormat,
}

impl MipLayout {
    pub fn byte_size(&self) -> usize {
        self.slice_size as usize * self.array_size as usize
    }
}

/// PCM buffer description
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioBufferDesc {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Expected decoded size; the backend may receive fewer bytes after a down-mix
    pub byte_len: usize,
}

/// What a slot is created for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotDesc {
    TextureMip(MipLayout),
    AudioBuffer(AudioBufferDesc),
    Bytes { size: usize },
}

impl SlotDesc {
    pub fn byte_size(&self) -> usize {
        match self {
            SlotDesc::TextureMip(layout) => layout.byte_size(),
            SlotDesc::AudioBuffer(desc) => desc.byte_len,
            SlotDesc::Bytes { size } => *size,
        }
    }
}

/// Native resource backend
///
/// Slot operations are only invoked while the owning asset's lock is held,
/// so implementations never see concurrent calls for the same slot.
pub trait ResourceBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Reserve storage for one chunk; never returns `SlotId::NULL`
    fn create_slot(&self, desc: &SlotDesc) -> Result<SlotId>;

    /// Upload decoded chunk bytes into a slot
    fn write_slot(&self, slot: SlotId, bytes: &[u8]) -> Result<()>;

    fn delete_slot(&self, slot: SlotId) -> Result<()>;

    fn live_slots(&self) -> usize;

    /// Whether multi-channel clips can be positioned in 3-D as-is
    fn supports_spatial_multichannel(&self) -> bool {
        true
    }
}

/// Which backend a payload commits to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendClass {
    Texture,
    Audio,
}

/// Context handed to chunk decoders
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    pub spatial_multichannel: bool,
    pub audio_decoder: Option<&'a dyn AudioDecoder>,
}

/// The set of backends the runtime commits into
#[derive(Clone)]
pub struct Backends {
    pub texture: Arc<dyn ResourceBackend>,
    pub audio: Arc<dyn ResourceBackend>,
    /// Decoder for compressed audio chunks
    pub audio_decoder: Option<Arc<dyn AudioDecoder>>,
}

impl Backends {
    pub fn new(texture: Arc<dyn ResourceBackend>, audio: Arc<dyn ResourceBackend>) -> Self {
        Self {
            texture,
            audio,
            audio_decoder: None,
        }
    }

    /// In-memory backends, for tools and tests without a device
    pub fn headless() -> Self {
        Self::new(
            Arc::new(MemoryBackend::new("texture")),
            Arc::new(MemoryBackend::new("audio")),
        )
    }

    pub fn with_audio_decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.audio_decoder = Some(decoder);
        self
    }

    pub fn get(&self, class: BackendClass) -> &Arc<dyn ResourceBackend> {
        match class {
            BackendClass::Texture => &self.texture,
            BackendClass::Audio => &self.audio,
        }
    }

    pub fn decode_context(&self) -> DecodeContext<'_> {
        DecodeContext {
            spatial_multichannel: self.audio.supports_spatial_multichannel(),
            audio_decoder: self.audio_decoder.as_deref(),
        }
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("texture", &self.texture.name())
            .field("audio", &self.audio.name())
            .field("audio_decoder", &self.audio_decoder.is_some())
            .finish()
    }
}
