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

//! Residency policies
//!
//! A policy is a pure function from usage and budget to the chunk set an
//! asset should hold. Each streaming group owns one.

use super::residency::ChunkMask;
use super::usage::UsageHint;
use crate::asset::audio::{find_buffer, needed_buffers};

/// Budget state of a group as seen by one asset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub budget_bytes: u64,
    /// Bytes held or targeted by the other assets of the group
    pub used_bytes: u64,
}

impl GroupSnapshot {
    pub const UNLIMITED: GroupSnapshot = GroupSnapshot {
        budget_bytes: u64::MAX,
        used_bytes: 0,
    };

    pub fn headroom(&self) -> u64 {
        self.budget_bytes.saturating_sub(self.used_bytes)
    }
}

/// Everything a policy may look at
#[derive(Clone, Copy, Debug)]
pub struct PolicyInput<'a> {
    pub usage: &'a UsageHint,
    pub total_chunks: usize,
    /// Stored size per chunk, indexed like the chunk table
    pub chunk_sizes: &'a [u32],
    pub current: ChunkMask,
    /// Buffer start times plus end time, for timed payloads
    pub timeline: Option<&'a [f32]>,
    pub group: GroupSnapshot,
}

impl PolicyInput<'_> {
    pub fn bytes_of(&self, mask: ChunkMask) -> u64 {
        mask.iter()
            .filter_map(|i| self.chunk_sizes.get(i))
            .map(|&size| u64::from(size))
            .sum()
    }
}

pub trait ResidencyPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Desired chunk set; the engine clamps it to `0..total_chunks`
    fn desired(&self, input: &PolicyInput<'_>) -> ChunkMask;
}

/// Texture policy: keep the K coarsest mips, K scaled by visible quality and
/// reduced until the group budget fits
#[derive(Clone, Copy, Debug, Default)]
pub struct MipResidencyPolicy {
    /// Mips kept regardless of budget
    pub min_resident: usize,
}

impl ResidencyPolicy for MipResidencyPolicy {
    fn name(&self) -> &str {
        "mip"
    }

    fn desired(&self, input: &PolicyInput<'_>) -> ChunkMask {
        let total = input.total_chunks;
        let wanted = match input.usage {
            UsageHint::Idle => 0,
            UsageHint::Visible { quality } => {
                (quality.clamp(0.0, 1.0) * total as f32).ceil() as usize
            }
            UsageHint::Playing { .. } | UsageHint::Pinned => total,
        };
        let floor = self.min_resident.min(total);
        let mut count = wanted.max(floor).min(total);

        let headroom = input.group.headroom();
        while count > floor && input.bytes_of(ChunkMask::suffix(total, count)) > headroom {
            count -= 1;
        }
        ChunkMask::suffix(total, count)
    }
}

/// Audio policy: the buffer under each play head plus `lookahead` buffers
/// after it. Over budget, lookahead is shed furthest-first.
#[derive(Clone, Copy, Debug)]
pub struct PlaybackResidencyPolicy {
    pub lookahead: usize,
}

impl Default for PlaybackResidencyPolicy {
    fn default() -> Self {
        Self { lookahead: 1 }
    }
}

impl ResidencyPolicy for PlaybackResidencyPolicy {
    fn name(&self) -> &str {
        "playback"
    }

    fn desired(&self, input: &PolicyInput<'_>) -> ChunkMask {
        let total = input.total_chunks;
        match input.usage {
            UsageHint::Idle => ChunkMask::EMPTY,
            UsageHint::Visible { .. } | UsageHint::Pinned => ChunkMask::full(total),
            UsageHint::Playing { positions } => {
                let Some(timeline) = input.timeline else {
                    return ChunkMask::full(total);
                };
                let mut playing_now = ChunkMask::EMPTY;
                let mut wanted = ChunkMask::EMPTY;
                for &position in positions {
                    wanted = wanted.union(needed_buffers(timeline, position, self.lookahead));
                    if let Some(index) = find_buffer(timeline, position) {
                        playing_now.insert(index);
                    }
                }

                let headroom = input.group.headroom();
                while input.bytes_of(wanted) > headroom {
                    match wanted.difference(playing_now).iter().next_back() {
                        Some(furthest) => wanted.remove(furthest),
                        None => break,
                    }
                }
                wanted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn input<'a>(
        usage: &'a UsageHint,
        sizes: &'a [u32],
        timeline: Option<&'a [f32]>,
        group: GroupSnapshot,
    ) -> PolicyInput<'a> {
        PolicyInput {
            usage,
            total_chunks: sizes.len(),
            chunk_sizes: sizes,
            current: ChunkMask::EMPTY,
            timeline,
            group,
        }
    }

    #[test]
    fn test_mip_policy_quality() {
        let sizes = [256, 64, 16, 4];
        let policy = MipResidencyPolicy::default();

        let full = UsageHint::visible(1.0);
        assert_eq!(
            policy.desired(&input(&full, &sizes, None, GroupSnapshot::UNLIMITED)),
            ChunkMask::full(4)
        );

        let half = UsageHint::visible(0.5);
        assert_eq!(
            policy.desired(&input(&half, &sizes, None, GroupSnapshot::UNLIMITED)),
            ChunkMask::suffix(4, 2)
        );

        let idle = UsageHint::Idle;
        assert_eq!(
            policy.desired(&input(&idle, &sizes, None, GroupSnapshot::UNLIMITED)),
            ChunkMask::EMPTY
        );
    }

    #[test]
    fn test_mip_policy_budget() {
        let sizes = [256, 64, 16, 4];
        let policy = MipResidencyPolicy { min_resident: 1 };
        let pinned = UsageHint::Pinned;
        let group = GroupSnapshot {
            budget_bytes: 200,
            used_bytes: 100,
        };
        // 100 bytes headroom: 64 + 16 + 4 fits, the finest mip does not
        assert_eq!(
            policy.desired(&input(&pinned, &sizes, None, group)),
            ChunkMask::suffix(4, 3)
        );

        let starved = GroupSnapshot {
            budget_bytes: 100,
            used_bytes: 100,
        };
        assert_eq!(
            policy.desired(&input(&pinned, &sizes, None, starved)),
            ChunkMask::suffix(4, 1)
        );
    }

    #[test]
    fn test_playback_policy() {
        let sizes = [100, 100, 100, 100];
        let timeline = [0.0, 1.0, 2.0, 3.0, 4.0];
        let policy = PlaybackResidencyPolicy::default();

        let playing = UsageHint::playing_at(1.5);
        let desired = policy.desired(&input(&playing, &sizes, Some(&timeline), GroupSnapshot::UNLIMITED));
        assert_eq!(desired.iter().collect::<Vec<_>>(), vec![1, 2]);

        let tight = GroupSnapshot {
            budget_bytes: 150,
            used_bytes: 0,
        };
        let desired = policy.desired(&input(&playing, &sizes, Some(&timeline), tight));
        assert_eq!(desired, ChunkMask::single(1));

        let two_heads = UsageHint::Playing {
            positions: smallvec![0.5, 3.5],
        };
        let desired = policy.desired(&input(&two_heads, &sizes, Some(&timeline), GroupSnapshot::UNLIMITED));
        assert_eq!(desired.iter().collect::<Vec<_>>(), vec![0, 1, 3]);

        let idle = UsageHint::Idle;
        assert!(policy
            .desired(&input(&idle, &sizes, Some(&timeline), GroupSnapshot::UNLIMITED))
            .is_empty());
    }
}
