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

//! Archetype Assets - Streamable binary asset subsystem
//!
//! Versioned chunked containers, typed asset construction with chained
//! upgrades, and residency-driven streaming of texture mips and audio
//! buffers into GPU/audio backends.

pub mod asset;
pub mod audio_source;
pub mod backend;
pub mod config;
pub mod container;
pub mod error;
pub mod executor;
pub mod factory;
pub mod id;
#[cfg(feature = "profiling")]
pub mod logging;
pub mod manager;
pub mod prelude;
pub mod runtime;
pub mod storage;
pub mod streaming;
pub mod upgrade;


pub use asset::{
    Asset, AssetHandle, AssetKind, AssetPayload, LoadContext, LoadOutcome, LoadState,
    StreamingProfile, WeakAssetHandle,
};
pub use audio_source::*;
pub use backend::{Backends, MemoryBackend, ResourceBackend, SlotDesc, SlotId};
pub use config::*;
pub use container::{AssetHeader, ChunkDescriptor, ContainerData};
pub use error::*;
pub use executor::*;
pub use factory::*;
pub use id::*;
pub use manager::*;
pub use runtime::*;
pub use storage::*;
pub use streaming::{
    ChunkMask, ResidencyChange, ResidencyListener, ResidencySnapshot, StreamingEngine,
    StreamingStats, UpdateReport, UsageHint, UsageTracker,
};
pub use upgrade::{run_upgrade, Migration, MigrationContext, UpgradeOptions, Upgrader};
