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

//! Binary asset container format
//!
//! Every field is little-endian:
//!
//! ```text
//! magic "SBAC" | format version u32 | flags u32 | id [u8; 16]
//! type name len u16 | type name utf-8
//! serialized version u32 | custom data len u32 | custom data
//! 16 x { offset u64, size u32, flags u32 }
//! [HAS_EDITOR_DATA] metadata len u32 | metadata | dep count u32 | dep ids
//! chunk payloads
//! ```

pub mod header;
pub mod writer;

pub use header::{AssetHeader, ChunkDescriptor};
pub use writer::{ChunkData, ContainerData};

use bitflags::bitflags;

pub const MAGIC: [u8; 4] = *b"SBAC";
pub const FORMAT_VERSION: u32 = 1;
pub const MAX_CHUNKS: usize = 16;
pub const MAX_TYPE_NAME_LEN: usize = 256;
pub const MAX_CUSTOM_DATA_LEN: usize = 16 * 1024 * 1024;
pub const MAX_METADATA_LEN: usize = 64 * 1024 * 1024;
pub const MAX_DEPENDENCIES: usize = 65_536;
pub const CHUNK_ENTRY_SIZE: usize = 16;
pub const FILE_EXTENSION: &str = "sbac";

bitflags! {
    /// Container-level flags
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ContainerFlags: u32 {
        /// Metadata blob and dependency list follow the chunk table
        const HAS_EDITOR_DATA = 1 << 0;
    }
}

bitflags! {
    /// Per-chunk flags; unknown bits are carried through untouched
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ChunkFlags: u32 {
        /// Cached bytes survive `Storage::close_file_handles`
        const KEEP_CACHED = 1 << 0;
    }
}
