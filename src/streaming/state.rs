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

//! Per-asset residency bookkeeping

use super::residency::{ChunkMask, ResidencyOrder, StreamingQueue};
use super::task::TaskHandle;
use crate::asset::{AssetPayload, StreamingProfile};
use crate::backend::{DecodeContext, ResourceBackend, SlotDesc, SlotId};
use crate::container::{AssetHeader, MAX_CHUNKS};
use crate::error::Result;
use crate::storage::Storage;
use std::sync::Arc;
use tracing::warn;

/// Point-in-time view of an asset's residency
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResidencySnapshot {
    pub total_chunks: usize,
    pub current: ChunkMask,
    pub target: ChunkMask,
    pub allocated: ChunkMask,
    pub task_in_flight: bool,
    /// Streaming tasks that failed in a row since the last success
    pub failures: u32,
}

impl ResidencySnapshot {
    pub fn current_count(&self) -> usize {
        self.current.count()
    }

    pub fn target_count(&self) -> usize {
        self.target.count()
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.count()
    }

    pub fn is_fully_resident(&self) -> bool {
        self.current == ChunkMask::full(self.total_chunks)
    }
}

/// Residency state of a chunked asset. Lives inside the asset lock.
///
/// Holds `current ⊆ allocated ⊆ 0..total_chunks`, and `slots[i]` is
/// non-null exactly when `i` is allocated.
pub struct StreamingState {
    pub(crate) group: &'static str,
    pub(crate) order: ResidencyOrder,
    pub(crate) total_chunks: usize,
    pub(crate) chunk_sizes: [u32; MAX_CHUNKS],
    pub(crate) timeline: Option<Arc<[f32]>>,
    pub(crate) current: ChunkMask,
    pub(crate) target: ChunkMask,
    pub(crate) allocated: ChunkMask,
    pub(crate) slots: [SlotId; MAX_CHUNKS],
    pub(crate) queue: StreamingQueue,
    pub(crate) task: Option<Arc<TaskHandle>>,
    pub(crate) backend: Arc<dyn ResourceBackend>,
    pub(crate) failures: u32,
}

impl StreamingState {
    pub(crate) fn new(
        profile: &StreamingProfile,
        header: &AssetHeader,
        backend: Arc<dyn ResourceBackend>,
    ) -> Self {
        let total_chunks = profile.total_chunks.min(MAX_CHUNKS);
        Self {
            group: profile.group,
            order: profile.order,
            total_chunks,
            chunk_sizes: std::array::from_fn(|i| header.chunk(i).map_or(0, |c| c.size)),
            timeline: profile.timeline.clone(),
            current: ChunkMask::EMPTY,
            target: ChunkMask::EMPTY,
            allocated: ChunkMask::EMPTY,
            slots: [SlotId::NULL; MAX_CHUNKS],
            queue: StreamingQueue::new(),
            task: None,
            backend,
            failures: 0,
        }
    }

    pub fn group(&self) -> &'static str {
        self.group
    }

    pub fn snapshot(&self) -> ResidencySnapshot {
        ResidencySnapshot {
            total_chunks: self.total_chunks,
            current: self.current,
            target: self.target,
            allocated: self.allocated,
            task_in_flight: self.task.is_some(),
            failures: self.failures,
        }
    }

    pub(crate) fn slot(&self, index: usize) -> SlotId {
        self.slots.get(index).copied().unwrap_or(SlotId::NULL)
    }

    pub(crate) fn bytes_of(&self, mask: ChunkMask) -> u64 {
        mask.iter().map(|i| u64::from(self.chunk_sizes[i])).sum()
    }

    /// Target differs from what is committed or allocated
    pub(crate) fn needs_work(&self) -> bool {
        self.target != self.current || self.allocated != self.target
    }

    pub(crate) fn allocate(&mut self, index: usize, desc: &SlotDesc) -> Result<()> {
        if self.allocated.contains(index) {
            return Ok(());
        }
        let slot = self.backend.create_slot(desc)?;
        self.slots[index] = slot;
        self.allocated.insert(index);
        Ok(())
    }

    /// Delete the slot of `index`; the chunk stops being resident
    pub(crate) fn release(&mut self, index: usize) {
        if !self.allocated.contains(index) {
            return;
        }
        let slot = std::mem::replace(&mut self.slots[index], SlotId::NULL);
        if let Err(err) = self.backend.delete_slot(slot) {
            warn!(index, ?slot, error = %err, "backend refused slot delete");
        }
        self.allocated.remove(index);
        self.current.remove(index);
    }

    pub(crate) fn release_mask(&mut self, mask: ChunkMask) {
        for index in mask.iter() {
            self.release(index);
        }
    }

    /// Release every slot, returning how many were held
    pub(crate) fn release_all(&mut self) -> usize {
        let held = self.allocated.count();
        self.release_mask(self.allocated);
        self.target = ChunkMask::EMPTY;
        self.queue.clear();
        held
    }

    /// Synchronously allocate, read, decode and commit every chunk.
    ///
    /// All-or-nothing: on error every slot created here is released.
    pub(crate) fn commit_resident(
        &mut self,
        payload: &AssetPayload,
        storage: &Storage,
        ctx: &DecodeContext<'_>,
    ) -> Result<()> {
        let mut order: Vec<usize> = ChunkMask::full(self.total_chunks).iter().collect();
        order.sort_by_key(|&i| self.order.rank(i, self.total_chunks));

        let mut provisional = ChunkMask::EMPTY;
        for index in order {
            let result = payload.slot_desc(index).and_then(|desc| {
                self.allocate(index, &desc)?;
                provisional.insert(index);
                let bytes = storage.load_chunk(index)?;
                let data = payload.decode_chunk(index, &bytes, ctx)?;
                self.backend.write_slot(self.slots[index], &data)
            });
            if let Err(err) = result {
                self.release_mask(provisional);
                return Err(err);
            }
        }
        self.current = ChunkMask::full(self.total_chunks);
        self.target = self.current;
        Ok(())
    }

    pub(crate) fn invariants_hold(&self) -> bool {
        let full = ChunkMask::full(self.total_chunks);
        self.current.is_subset(self.allocated)
            && self.allocated.is_subset(full)
            && (0..MAX_CHUNKS).all(|i| self.slots[i].is_null() != self.allocated.contains(i))
    }
}

impl Drop for StreamingState {
    fn drop(&mut self) {
        if !self.allocated.is_empty() {
            warn!(
                slots = self.allocated.count(),
                "streaming state dropped with live slots; releasing"
            );
            self.release_all();
        }
    }
}

impl std::fmt::Debug for StreamingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingState")
            .field("group", &self.group)
            .field("total_chunks", &self.total_chunks)
            .field("current", &self.current)
            .field("target", &self.target)
            .field("allocated", &self.allocated)
            .field("task", &self.task.as_ref().map(|t| t.id()))
            .finish()
    }
}
