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

//! Streaming groups and their byte budgets

use super::policy::{GroupSnapshot, ResidencyPolicy};
use crate::id::AssetId;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub const TEXTURE_GROUP: &str = "textures";
pub const AUDIO_GROUP: &str = "audio";

/// Per-asset byte accounting against a fixed capacity
#[derive(Debug, Clone)]
pub struct BudgetPool {
    capacity: u64,
    used: u64,
    allocations: FxHashMap<AssetId, u64>,
}

impl BudgetPool {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: 0,
            allocations: FxHashMap::default(),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    /// Set the bytes attributed to `id`, replacing its previous share
    pub fn assign(&mut self, id: AssetId, size: u64) {
        let previous = if size == 0 {
            self.allocations.remove(&id).unwrap_or(0)
        } else {
            self.allocations.insert(id, size).unwrap_or(0)
        };
        self.used = self.used - previous + size;
    }

    /// Drop the share of `id`, returning it
    pub fn release(&mut self, id: AssetId) -> u64 {
        let size = self.allocations.remove(&id).unwrap_or(0);
        self.used -= size;
        size
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }

    pub fn utilization(&self) -> f32 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.used as f32 / self.capacity as f32
    }

    pub fn allocation(&self, id: AssetId) -> u64 {
        self.allocations.get(&id).copied().unwrap_or(0)
    }

    /// Budget view for `id`: what everyone else uses
    pub fn snapshot_for(&self, id: AssetId) -> GroupSnapshot {
        GroupSnapshot {
            budget_bytes: self.capacity,
            used_bytes: self.used - self.allocation(id),
        }
    }

    pub fn clear(&mut self) {
        self.used = 0;
        self.allocations.clear();
    }
}

/// A named set of streamable assets sharing one policy and one budget
pub struct StreamingGroup {
    name: String,
    policy: Arc<dyn ResidencyPolicy>,
    pool: Mutex<BudgetPool>,
}

impl StreamingGroup {
    pub fn new(name: impl Into<String>, policy: Arc<dyn ResidencyPolicy>, budget_bytes: Option<u64>) -> Self {
        Self {
            name: name.into(),
            policy,
            pool: Mutex::new(budget_bytes.map_or_else(BudgetPool::unlimited, BudgetPool::new)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &Arc<dyn ResidencyPolicy> {
        &self.policy
    }

    pub fn snapshot_for(&self, id: AssetId) -> GroupSnapshot {
        self.pool.lock().snapshot_for(id)
    }

    pub fn assign(&self, id: AssetId, bytes: u64) {
        self.pool.lock().assign(id, bytes);
    }

    pub fn release(&self, id: AssetId) {
        self.pool.lock().release(id);
    }

    pub fn budget_bytes(&self) -> u64 {
        self.pool.lock().capacity()
    }

    pub fn used_bytes(&self) -> u64 {
        self.pool.lock().used()
    }

    pub fn utilization(&self) -> f32 {
        self.pool.lock().utilization()
    }
}

impl std::fmt::Debug for StreamingGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingGroup")
            .field("name", &self.name)
            .field("policy", &self.policy.name())
            .field("pool", &*self.pool.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::policy::MipResidencyPolicy;

    #[test]
    fn test_budget_pool_assign() {
        let mut pool = BudgetPool::new(1000);
        let a = AssetId::from_u128(1);
        let b = AssetId::from_u128(2);
        pool.assign(a, 500);
        assert_eq!(pool.available(), 500);
        assert_eq!(pool.allocation(a), 500);

        pool.assign(a, 200);
        pool.assign(b, 300);
        assert_eq!(pool.used(), 500);
        assert_eq!(pool.snapshot_for(a).used_bytes, 300);

        assert_eq!(pool.release(b), 300);
        assert_eq!(pool.used(), 200);
        pool.assign(a, 0);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_budget_utilization() {
        let mut pool = BudgetPool::new(1000);
        pool.assign(AssetId::from_u128(1), 250);
        assert!((pool.utilization() - 0.25).abs() < 0.01);
        pool.clear();
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_group_defaults_to_unlimited() {
        let group = StreamingGroup::new(TEXTURE_GROUP, Arc::new(MipResidencyPolicy::default()), None);
        assert_eq!(group.budget_bytes(), u64::MAX);
        assert_eq!(group.policy().name(), "mip");
    }
}
