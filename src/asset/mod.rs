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

// Asset Objects
//
// An `Asset` is the shared, lock-protected object behind every handle:
// - load state machine with waiters
// - parsed header and typed payload
// - optional streaming residency

pub mod audio;
pub mod json;
pub mod texture;

pub use audio::{AudioClipData, AudioClipKind, AudioDecoder, AudioFormat, AudioHeader};
pub use json::{JsonData, JsonHeader, JsonKind};
pub use texture::{PixelFormat, TextureData, TextureFlags, TextureHeader, TextureKind};

use crate::backend::{BackendClass, Backends, DecodeContext, SlotDesc, SlotId};
use crate::container::AssetHeader;
use crate::error::{AssetError, Result};
use crate::id::{AssetId, TypeName};
use crate::storage::Storage;
use crate::streaming::{ResidencyOrder, ResidencySnapshot, StreamingState, AUDIO_GROUP, TEXTURE_GROUP};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Lifecycle of an asset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadState {
    Unloaded,
    HeaderLoaded,
    Loading,
    Loaded,
    LoadFailed,
    Unloading,
}

/// Typed payload of a loaded asset
#[derive(Debug, Default)]
pub enum AssetPayload {
    #[default]
    Empty,
    Texture(TextureData),
    Audio(AudioClipData),
    Json(JsonData),
}

/// How a payload maps onto streamed chunks
#[derive(Clone, Debug)]
pub struct StreamingProfile {
    pub group: &'static str,
    pub class: BackendClass,
    pub order: ResidencyOrder,
    pub total_chunks: usize,
    pub timeline: Option<Arc<[f32]>>,
}

impl AssetPayload {
    pub fn streaming_profile(&self) -> Option<StreamingProfile> {
        match self {
            AssetPayload::Texture(data) => Some(StreamingProfile {
                group: TEXTURE_GROUP,
                class: BackendClass::Texture,
                order: ResidencyOrder::CoarseFirst,
                total_chunks: data.header.mip_levels as usize,
                timeline: None,
            }),
            AssetPayload::Audio(data) => Some(StreamingProfile {
                group: AUDIO_GROUP,
                class: BackendClass::Audio,
                order: ResidencyOrder::Sequential,
                total_chunks: data.header.samples_per_chunk.len(),
                timeline: Some(Arc::clone(data.start_times())),
            }),
            AssetPayload::Json(_) | AssetPayload::Empty => None,
        }
    }

    /// Backend slot needed to hold chunk `index`
    pub fn slot_desc(&self, index: usize) -> Result<SlotDesc> {
        match self {
            AssetPayload::Texture(data) => data.slot_desc(index),
            AssetPayload::Audio(data) => data.slot_desc(index),
            _ => Err(AssetError::InvalidState("payload has no streamed chunks".into())),
        }
    }

    /// Turn stored chunk bytes into what the backend receives
    pub fn decode_chunk(&self, index: usize, bytes: &Arc<[u8]>, ctx: &DecodeContext<'_>) -> Result<Arc<[u8]>> {
        match self {
            AssetPayload::Texture(data) => data.decode_chunk(index, bytes),
            AssetPayload::Audio(data) => data.decode_chunk(index, bytes, ctx),
            _ => Err(AssetError::InvalidState("payload has no streamed chunks".into())),
        }
    }

    pub fn as_texture(&self) -> Option<&TextureData> {
        match self {
            AssetPayload::Texture(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioClipData> {
        match self {
            AssetPayload::Audio(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&JsonData> {
        match self {
            AssetPayload::Json(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_json_mut(&mut self) -> Option<&mut JsonData> {
        match self {
            AssetPayload::Json(data) => Some(data),
            _ => None,
        }
    }
}

/// What `AssetKind::load` left behind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Payload complete, nothing to stream
    Resident,
    /// Registered for streaming at zero residency
    Streamable,
}

/// Everything a kind may touch while loading
pub struct LoadContext<'a> {
    pub(crate) id: AssetId,
    pub(crate) header: &'a AssetHeader,
    pub(crate) storage: Option<&'a Arc<Storage>>,
    pub(crate) payload: &'a mut AssetPayload,
    pub(crate) streaming: &'a mut Option<StreamingState>,
    pub(crate) backends: &'a Backends,
}

impl LoadContext<'_> {
    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn header(&self) -> &AssetHeader {
        self.header
    }

    pub fn storage(&self) -> Option<&Arc<Storage>> {
        self.storage
    }

    pub fn payload(&self) -> &AssetPayload {
        self.payload
    }

    pub fn payload_mut(&mut self) -> &mut AssetPayload {
        self.payload
    }

    pub fn load_chunk(&self, index: usize) -> Result<Arc<[u8]>> {
        self.storage
            .ok_or_else(|| AssetError::chunk_missing(index, "asset has no storage"))?
            .load_chunk(index)
    }

    /// Create zero-residency streaming state for the payload's chunks
    pub fn prepare_streaming(&mut self) -> Result<()> {
        let profile = self
            .payload
            .streaming_profile()
            .ok_or_else(|| AssetError::InvalidState("payload has no chunks to stream".into()))?;
        let backend = Arc::clone(self.backends.get(profile.class));
        *self.streaming = Some(StreamingState::new(&profile, self.header, backend));
        Ok(())
    }

    /// Commit every chunk now; used by non-streamable payloads
    pub fn commit_all_chunks(&mut self) -> Result<()> {
        let storage = self
            .storage
            .ok_or_else(|| AssetError::InvalidState("asset has no storage".into()))?;
        let state = self
            .streaming
            .as_mut()
            .ok_or_else(|| AssetError::InvalidState("streaming state not prepared".into()))?;
        state.commit_resident(self.payload, storage, &self.backends.decode_context())
    }
}

/// Capability set of an asset type
pub trait AssetKind: Send + Sync + 'static {
    fn type_name(&self) -> &'static str;

    /// Validate the type-specific header and build an empty payload
    fn init(&self, header: &AssetHeader) -> Result<AssetPayload>;

    /// Custom data for an asset created without a file
    fn init_virtual(&self) -> Result<Vec<u8>> {
        Err(AssetError::InvalidState(format!(
            "{} does not support virtual assets",
            self.type_name()
        )))
    }

    /// Materialize the payload or prepare it for streaming
    fn load(&self, ctx: &mut LoadContext<'_>) -> Result<LoadOutcome>;

    /// Drop kind-specific payload state; backend slots are already released
    fn unload(&self, payload: &mut AssetPayload) {
        *payload = AssetPayload::Empty;
    }
}

pub(crate) struct AssetInner {
    pub(crate) state: LoadState,
    pub(crate) storage: Option<Arc<Storage>>,
    pub(crate) header: Option<Arc<AssetHeader>>,
    pub(crate) payload: AssetPayload,
    pub(crate) streaming: Option<StreamingState>,
    pub(crate) error: Option<AssetError>,
    /// A load job is queued and has not started
    pub(crate) load_queued: bool,
    /// Dependencies held while loaded; linked in the manager's graph
    pub(crate) dependencies: Vec<Arc<Asset>>,
}

/// Shared asset object
pub struct Asset {
    id: AssetId,
    type_name: TypeName,
    kind: Arc<dyn AssetKind>,
    path: Option<PathBuf>,
    inner: Mutex<AssetInner>,
    state_changed: Condvar,
    external_refs: AtomicUsize,
}

impl Asset {
    pub(crate) fn new(
        id: AssetId,
        type_name: TypeName,
        kind: Arc<dyn AssetKind>,
        path: Option<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            type_name,
            kind,
            path,
            inner: Mutex::new(AssetInner {
                state: LoadState::Unloaded,
                storage: None,
                header: None,
                payload: AssetPayload::Empty,
                streaming: None,
                error: None,
                load_queued: false,
                dependencies: Vec::new(),
            }),
            state_changed: Condvar::new(),
            external_refs: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_virtual(&self) -> bool {
        self.path.is_none()
    }

    pub(crate) fn kind(&self) -> &Arc<dyn AssetKind> {
        &self.kind
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, AssetInner> {
        self.inner.lock()
    }

    pub(crate) fn notify_state_changed(&self) {
        self.state_changed.notify_all();
    }

    pub fn state(&self) -> LoadState {
        self.inner.lock().state
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    /// Error recorded by the last failed load
    pub fn error(&self) -> Option<AssetError> {
        self.inner.lock().error.clone()
    }

    pub fn header(&self) -> Option<Arc<AssetHeader>> {
        self.inner.lock().header.clone()
    }

    pub fn storage(&self) -> Option<Arc<Storage>> {
        self.inner.lock().storage.clone()
    }

    pub fn residency(&self) -> Option<ResidencySnapshot> {
        self.inner
            .lock()
            .streaming
            .as_ref()
            .map(StreamingState::snapshot)
    }

    /// Backend slot of chunk `index`, `SlotId::NULL` when not allocated
    pub fn slot(&self, index: usize) -> SlotId {
        self.inner
            .lock()
            .streaming
            .as_ref()
            .map_or(SlotId::NULL, |state| state.slot(index))
    }

    pub fn dependencies(&self) -> Vec<AssetId> {
        self.inner
            .lock()
            .header
            .as_ref()
            .map(|h| h.dependencies.clone())
            .unwrap_or_default()
    }

    /// Number of live `AssetHandle`s
    pub fn external_refs(&self) -> usize {
        self.external_refs.load(Ordering::SeqCst)
    }

    /// Run `f` on the payload; `None` unless loaded
    pub fn with_payload<R>(&self, f: impl FnOnce(&AssetPayload) -> R) -> Option<R> {
        let inner = self.inner.lock();
        (inner.state == LoadState::Loaded).then(|| f(&inner.payload))
    }

    pub fn with_payload_mut<R>(&self, f: impl FnOnce(&mut AssetPayload) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        if inner.state != LoadState::Loaded {
            return None;
        }
        Some(f(&mut inner.payload))
    }

    pub fn texture_header(&self) -> Option<TextureHeader> {
        self.with_payload(|p| p.as_texture().map(|t| t.header.clone()))
            .flatten()
    }

    pub fn audio_header(&self) -> Option<AudioHeader> {
        self.with_payload(|p| p.as_audio().map(|a| a.header.clone()))
            .flatten()
    }

    pub fn json_value(&self) -> Option<serde_json::Value> {
        self.with_payload(|p| p.as_json().map(|j| j.value.clone()))
            .flatten()
    }

    fn settled(inner: &AssetInner) -> Option<Result<()>> {
        match inner.state {
            LoadState::Loaded => Some(Ok(())),
            LoadState::LoadFailed => Some(Err(inner
                .error
                .clone()
                .unwrap_or_else(|| AssetError::InvalidState("load failed".into())))),
            LoadState::Unloaded if !inner.load_queued => Some(Err(AssetError::Cancelled)),
            _ => None,
        }
    }

    /// Block until the asset is loaded or its load ends otherwise
    pub fn wait_loaded(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(result) = Self::settled(&inner) {
                return result;
            }
            self.state_changed.wait(&mut inner);
        }
    }

    /// `None` on timeout
    pub fn wait_loaded_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(result) = Self::settled(&inner) {
                return Some(result);
            }
            if self.state_changed.wait_until(&mut inner, deadline).timed_out() {
                return Self::settled(&inner);
            }
        }
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Asset")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

/// Strong, counted reference to an asset
///
/// The manager only unloads an asset once no handle remains.
pub struct AssetHandle {
    asset: Arc<Asset>,
}

impl AssetHandle {
    pub(crate) fn new(asset: Arc<Asset>) -> Self {
        asset.external_refs.fetch_add(1, Ordering::SeqCst);
        Self { asset }
    }

    pub fn id(&self) -> AssetId {
        self.asset.id
    }

    pub fn asset(&self) -> &Arc<Asset> {
        &self.asset
    }

    pub fn downgrade(&self) -> WeakAssetHandle {
        WeakAssetHandle {
            id: self.asset.id,
            asset: Arc::downgrade(&self.asset),
        }
    }

    pub fn ptr_eq(&self, other: &AssetHandle) -> bool {
        Arc::ptr_eq(&self.asset, &other.asset)
    }
}

impl Clone for AssetHandle {
    fn clone(&self) -> Self {
        AssetHandle::new(Arc::clone(&self.asset))
    }
}

impl Drop for AssetHandle {
    fn drop(&mut self) {
        self.asset.external_refs.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Deref for AssetHandle {
    type Target = Asset;

    fn deref(&self) -> &Asset {
        &self.asset
    }
}

impl fmt::Debug for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AssetHandle").field(&self.asset.id).finish()
    }
}

/// Uncounted reference that doesn't prevent unloading
#[derive(Clone, Debug)]
pub struct WeakAssetHandle {
    id: AssetId,
    asset: Weak<Asset>,
}

impl WeakAssetHandle {
    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.asset.strong_count() > 0
    }

    /// Current state, or `Unloaded` once the asset is gone
    pub fn state(&self) -> LoadState {
        self.asset
            .upgrade()
            .map_or(LoadState::Unloaded, |asset| asset.state())
    }
}
