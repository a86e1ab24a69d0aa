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

//! Usage hints consumed by residency policies

use crate::id::AssetId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

/// How an asset is being used right now
#[derive(Clone, Debug, Default, PartialEq)]
pub enum UsageHint {
    /// Nothing references the asset
    #[default]
    Idle,
    /// On screen; `quality` in `[0, 1]` scales requested detail
    Visible { quality: f32 },
    /// Audio playback at the given clip positions, in seconds
    Playing { positions: SmallVec<[f32; 4]> },
    /// Keep everything resident
    Pinned,
}

impl UsageHint {
    pub fn visible(quality: f32) -> Self {
        UsageHint::Visible { quality }
    }

    pub fn playing_at(position: f32) -> Self {
        let mut positions = SmallVec::new();
        positions.push(position);
        UsageHint::Playing { positions }
    }
}

/// Immutable view of every hint at one instant
pub type UsageSnapshot = Arc<FxHashMap<AssetId, UsageHint>>;

/// Collects usage hints from game-side systems between update passes
#[derive(Default)]
pub struct UsageTracker {
    hints: RwLock<FxHashMap<AssetId, UsageHint>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: AssetId, hint: UsageHint) {
        let mut hints = self.hints.write();
        if hint == UsageHint::Idle {
            hints.remove(&id);
        } else {
            hints.insert(id, hint);
        }
    }

    pub fn clear(&self, id: AssetId) {
        self.hints.write().remove(&id);
    }

    pub fn get(&self, id: AssetId) -> UsageHint {
        self.hints.read().get(&id).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.hints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.read().is_empty()
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        Arc::new(self.hints.read().clone())
    }
}
