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

//! Residency sets and streaming queue planning

use crate::container::MAX_CHUNKS;
use smallvec::SmallVec;
use std::fmt;

/// Set of chunk indices
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChunkMask(u32);

impl ChunkMask {
    pub const EMPTY: ChunkMask = ChunkMask(0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & ((1u32 << MAX_CHUNKS) - 1))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Chunks `0..total`
    pub fn full(total: usize) -> Self {
        Self::range(0, total)
    }

    /// Chunks `start..end`, clamped to `MAX_CHUNKS`
    pub fn range(start: usize, end: usize) -> Self {
        let end = end.min(MAX_CHUNKS);
        if start >= end {
            return Self::EMPTY;
        }
        let high = if end == 32 { u32::MAX } else { (1u32 << end) - 1 };
        let low = (1u32 << start) - 1;
        Self(high & !low)
    }

    /// The last `count` chunks of `0..total`
    pub fn suffix(total: usize, count: usize) -> Self {
        let total = total.min(MAX_CHUNKS);
        Self::range(total - count.min(total), total)
    }

    pub fn single(index: usize) -> Self {
        let mut mask = Self::EMPTY;
        mask.insert(index);
        mask
    }

    pub fn contains(self, index: usize) -> bool {
        index < MAX_CHUNKS && self.0 & (1 << index) != 0
    }

    pub fn insert(&mut self, index: usize) {
        if index < MAX_CHUNKS {
            self.0 |= 1 << index;
        }
    }

    pub fn remove(&mut self, index: usize) {
        if index < MAX_CHUNKS {
            self.0 &= !(1 << index);
        }
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_subset(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Indices in ascending order
    pub fn iter(self) -> impl DoubleEndedIterator<Item = usize> {
        (0..MAX_CHUNKS).filter(move |&i| self.contains(i))
    }
}

impl FromIterator<usize> for ChunkMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut mask = Self::EMPTY;
        for index in iter {
            mask.insert(index);
        }
        mask
    }
}

impl fmt::Debug for ChunkMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Order in which chunks become resident
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResidencyOrder {
    /// Highest index first (texture mips: coarsest first)
    CoarseFirst,
    /// Lowest index first (audio buffers in playback order)
    Sequential,
}

impl ResidencyOrder {
    /// Position of `index` in residency order; rank 0 becomes resident first
    pub fn rank(self, index: usize, total: usize) -> usize {
        match self {
            ResidencyOrder::CoarseFirst => total.saturating_sub(1).saturating_sub(index),
            ResidencyOrder::Sequential => index,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkOp {
    Load,
    Release,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueuedChunk {
    pub index: usize,
    pub op: ChunkOp,
    /// Growth chunk with no backend slot yet
    pub needs_allocation: bool,
}

pub type StreamingQueue = SmallVec<[QueuedChunk; MAX_CHUNKS]>;

/// Work needed to move from `current`/`allocated` to `desired`.
///
/// Loads come first, least-resident rank first; releases follow, highest
/// rank first.
pub fn plan_queue(
    current: ChunkMask,
    allocated: ChunkMask,
    desired: ChunkMask,
    order: ResidencyOrder,
    total: usize,
) -> StreamingQueue {
    let mut loads: SmallVec<[usize; MAX_CHUNKS]> = desired.difference(current).iter().collect();
    loads.sort_by_key(|&i| order.rank(i, total));

    let mut releases: SmallVec<[usize; MAX_CHUNKS]> = allocated.difference(desired).iter().collect();
    releases.sort_by_key(|&i| std::cmp::Reverse(order.rank(i, total)));

    loads
        .into_iter()
        .map(|index| QueuedChunk {
            index,
            op: ChunkOp::Load,
            needs_allocation: !allocated.contains(index),
        })
        .chain(releases.into_iter().map(|index| QueuedChunk {
            index,
            op: ChunkOp::Release,
            needs_allocation: false,
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_ranges() {
        assert_eq!(ChunkMask::full(3).bits(), 0b111);
        assert_eq!(ChunkMask::suffix(10, 3).iter().collect::<Vec<_>>(), vec![7, 8, 9]);
        assert_eq!(ChunkMask::suffix(4, 10), ChunkMask::full(4));
        assert_eq!(ChunkMask::suffix(4, 0), ChunkMask::EMPTY);
        assert_eq!(ChunkMask::full(MAX_CHUNKS).count(), MAX_CHUNKS);
        assert_eq!(ChunkMask::full(40).count(), MAX_CHUNKS);
    }

    #[test]
    fn test_mask_set_ops() {
        let a: ChunkMask = [0, 1, 2].into_iter().collect();
        let b: ChunkMask = [2, 3].into_iter().collect();
        assert_eq!(a.union(b).count(), 4);
        assert_eq!(a.intersection(b), ChunkMask::single(2));
        assert_eq!(a.difference(b).iter().collect::<Vec<_>>(), vec![0, 1]);
        assert!(ChunkMask::single(1).is_subset(a));
        assert!(!b.is_subset(a));
    }

    #[test]
    fn test_texture_growth_is_coarse_first() {
        let current = ChunkMask::suffix(6, 1);
        let desired = ChunkMask::suffix(6, 4);
        let queue = plan_queue(current, current, desired, ResidencyOrder::CoarseFirst, 6);
        let indices: Vec<_> = queue.iter().map(|q| q.index).collect();
        assert_eq!(indices, vec![4, 3, 2]);
        assert!(queue.iter().all(|q| q.op == ChunkOp::Load && q.needs_allocation));
    }

    #[test]
    fn test_texture_shrink_releases_finest_first() {
        let current = ChunkMask::suffix(6, 5);
        let desired = ChunkMask::suffix(6, 2);
        let queue = plan_queue(current, current, desired, ResidencyOrder::CoarseFirst, 6);
        let indices: Vec<_> = queue.iter().map(|q| q.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(queue.iter().all(|q| q.op == ChunkOp::Release));
    }

    #[test]
    fn test_audio_mixed_plan() {
        let current: ChunkMask = [0, 1].into_iter().collect();
        let allocated: ChunkMask = [0, 1, 2].into_iter().collect();
        let desired: ChunkMask = [1, 2, 3].into_iter().collect();
        let queue = plan_queue(current, allocated, desired, ResidencyOrder::Sequential, 4);
        assert_eq!(
            queue.as_slice(),
            &[
                QueuedChunk { index: 2, op: ChunkOp::Load, needs_allocation: false },
                QueuedChunk { index: 3, op: ChunkOp::Load, needs_allocation: true },
                QueuedChunk { index: 0, op: ChunkOp::Release, needs_allocation: false },
            ]
        );
    }

    #[test]
    fn test_noop_plan() {
        let mask = ChunkMask::full(4);
        assert!(plan_queue(mask, mask, mask, ResidencyOrder::Sequential, 4).is_empty());
    }
}
