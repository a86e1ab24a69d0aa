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

//! Playing audio sources
//!
//! Sources name their clip by id and never hold the asset. Each update they
//! publish their play heads as `UsageHint::Playing`; when the engine commits
//! a buffer a playing source needs, the source gets one `Refresh` event.

use crate::asset::audio::needed_buffers;
use crate::id::AssetId;
use crate::streaming::{ChunkMask, ResidencyChange, ResidencyListener, UsageHint, UsageTracker};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use tracing::trace;

new_key_type! {
    pub struct SourceId;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// Buffer `chunk` of the source's clip is now resident
    Refresh {
        source: SourceId,
        clip: AssetId,
        chunk: usize,
    },
}

#[derive(Clone, Debug)]
struct AudioSource {
    clip: AssetId,
    position: f32,
    playing: bool,
    /// Committed buffers this source was already told about
    fed: ChunkMask,
}

pub struct AudioSourceRegistry {
    sources: RwLock<SlotMap<SourceId, AudioSource>>,
    lookahead: usize,
    published: Mutex<FxHashSet<AssetId>>,
    sender: Sender<SourceEvent>,
    receiver: Receiver<SourceEvent>,
}

impl AudioSourceRegistry {
    /// `lookahead` should match the audio group's playback policy
    pub fn new(lookahead: usize) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sources: RwLock::new(SlotMap::with_key()),
            lookahead,
            published: Mutex::new(FxHashSet::default()),
            sender,
            receiver,
        }
    }

    pub fn create(&self, clip: AssetId) -> SourceId {
        self.sources.write().insert(AudioSource {
            clip,
            position: 0.0,
            playing: false,
            fed: ChunkMask::EMPTY,
        })
    }

    pub fn remove(&self, source: SourceId) -> bool {
        self.sources.write().remove(source).is_some()
    }

    pub fn play(&self, source: SourceId, position: f32) -> bool {
        match self.sources.write().get_mut(source) {
            Some(s) => {
                s.playing = true;
                s.position = position;
                true
            }
            None => false,
        }
    }

    pub fn stop(&self, source: SourceId) -> bool {
        match self.sources.write().get_mut(source) {
            Some(s) => {
                s.playing = false;
                true
            }
            None => false,
        }
    }

    pub fn seek(&self, source: SourceId, position: f32) -> bool {
        match self.sources.write().get_mut(source) {
            Some(s) => {
                s.position = position;
                true
            }
            None => false,
        }
    }

    pub fn position(&self, source: SourceId) -> Option<f32> {
        self.sources.read().get(source).map(|s| s.position)
    }

    pub fn is_playing(&self, source: SourceId) -> bool {
        self.sources.read().get(source).is_some_and(|s| s.playing)
    }

    pub fn clip(&self, source: SourceId) -> Option<AssetId> {
        self.sources.read().get(source).map(|s| s.clip)
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    /// Receiver of refresh events; clones share one queue
    pub fn events(&self) -> Receiver<SourceEvent> {
        self.receiver.clone()
    }

    pub fn drain_events(&self) -> Vec<SourceEvent> {
        self.receiver.try_iter().collect()
    }

    /// Publish play heads per clip. Clips that stopped playing since the
    /// last call are cleared back to idle.
    pub fn publish_usage(&self, tracker: &UsageTracker) {
        let mut heads: FxHashMap<AssetId, SmallVec<[f32; 4]>> = FxHashMap::default();
        for source in self.sources.read().values().filter(|s| s.playing) {
            heads.entry(source.clip).or_default().push(source.position);
        }

        let mut published = self.published.lock();
        for clip in published.iter() {
            if !heads.contains_key(clip) {
                tracker.clear(*clip);
            }
        }
        published.clear();
        for (clip, positions) in heads {
            published.insert(clip);
            tracker.set(clip, UsageHint::Playing { positions });
        }
    }
}

impl Default for AudioSourceRegistry {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ResidencyListener for AudioSourceRegistry {
    fn on_residency_changed(&self, change: &ResidencyChange) {
        let mut sources = self.sources.write();
        for (id, source) in sources.iter_mut().filter(|(_, s)| s.clip == change.asset) {
            source.fed = source.fed.difference(change.released);
            if !source.playing {
                continue;
            }
            let needed = match change.timeline.as_deref() {
                Some(timeline) => needed_buffers(timeline, source.position, self.lookahead),
                None => ChunkMask::full(change.total_chunks),
            };
            let fresh = change.committed.intersection(needed).difference(source.fed);
            for chunk in fresh.iter() {
                trace!(source = ?id, clip = %change.asset, chunk, "audio source refresh");
                // Receiver lives in `self`, so the channel never disconnects
                let _ = self.sender.send(SourceEvent::Refresh {
                    source: id,
                    clip: change.asset,
                    chunk,
                });
            }
            source.fed = source.fed.union(fresh);
        }
    }
}

impl std::fmt::Debug for AudioSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSourceRegistry")
            .field("sources", &self.len())
            .field("lookahead", &self.lookahead)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn change(clip: AssetId, committed: ChunkMask, released: ChunkMask) -> ResidencyChange {
        ResidencyChange {
            asset: clip,
            committed,
            released,
            current: committed,
            total_chunks: 4,
            timeline: Some(Arc::from(vec![0.0, 1.0, 2.0, 3.0, 4.0])),
        }
    }

    #[test]
    fn test_publish_usage() {
        let registry = AudioSourceRegistry::new(1);
        let tracker = UsageTracker::new();
        let clip = AssetId::generate();
        let a = registry.create(clip);
        let b = registry.create(clip);
        registry.play(a, 0.5);
        registry.play(b, 2.5);
        registry.publish_usage(&tracker);
        match tracker.get(clip) {
            UsageHint::Playing { positions } => assert_eq!(positions.len(), 2),
            other => panic!("unexpected hint {other:?}"),
        }

        registry.stop(a);
        registry.stop(b);
        registry.publish_usage(&tracker);
        assert_eq!(tracker.get(clip), UsageHint::Idle);
    }

    #[test]
    fn test_refresh_once_per_needed_chunk() {
        let registry = AudioSourceRegistry::new(1);
        let clip = AssetId::generate();
        let source = registry.create(clip);
        let idle = registry.create(clip);
        registry.play(source, 0.5);

        registry.on_residency_changed(&change(clip, ChunkMask::range(0, 3), ChunkMask::EMPTY));
        let events = registry.drain_events();
        // buffer 2 is beyond the lookahead
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, SourceEvent::Refresh { source: s, .. } if *s == source)));
        assert!(!events.iter().any(|e| matches!(e, SourceEvent::Refresh { source: s, .. } if *s == idle)));

        registry.on_residency_changed(&change(clip, ChunkMask::single(1), ChunkMask::EMPTY));
        assert!(registry.drain_events().is_empty());

        registry.on_residency_changed(&change(clip, ChunkMask::EMPTY, ChunkMask::single(1)));
        registry.on_residency_changed(&change(clip, ChunkMask::single(1), ChunkMask::EMPTY));
        assert_eq!(
            registry.drain_events(),
            vec![SourceEvent::Refresh {
                source,
                clip,
                chunk: 1
            }]
        );
    }

    #[test]
    fn test_other_clips_ignored() {
        let registry = AudioSourceRegistry::new(1);
        let source = registry.create(AssetId::generate());
        registry.play(source, 0.0);
        registry.on_residency_changed(&change(AssetId::generate(), ChunkMask::full(4), ChunkMask::EMPTY));
        assert!(registry.drain_events().is_empty());
    }
}
