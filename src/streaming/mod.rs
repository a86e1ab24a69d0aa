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

//! Streamable resource engine
//!
//! `update` walks every registered streamable asset once, asks the asset's
//! group policy for a desired residency and, when it differs from what is
//! resident, hands a streaming task to the executor. At most one task per
//! asset is in flight; decisions made meanwhile only move the target.

pub mod group;
pub mod policy;
pub mod residency;
pub mod state;
pub mod task;
pub mod usage;

pub use group::{BudgetPool, StreamingGroup, AUDIO_GROUP, TEXTURE_GROUP};
pub use policy::{
    GroupSnapshot, MipResidencyPolicy, PlaybackResidencyPolicy, PolicyInput, ResidencyPolicy,
};
pub use residency::{plan_queue, ChunkMask, ChunkOp, QueuedChunk, ResidencyOrder, StreamingQueue};
pub use state::{ResidencySnapshot, StreamingState};
pub use task::TaskHandle;
pub use usage::{UsageHint, UsageSnapshot, UsageTracker};

use crate::asset::{Asset, LoadState};
use crate::backend::Backends;
use crate::error::{AssetError, Result};
use crate::executor::TaskExecutor;
use crate::id::AssetId;
use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, trace, warn};

/// Residency published by a finished streaming task
#[derive(Clone, Debug, PartialEq)]
pub struct ResidencyChange {
    pub asset: AssetId,
    /// Chunks that became resident
    pub committed: ChunkMask,
    /// Chunks that stopped being resident
    pub released: ChunkMask,
    pub current: ChunkMask,
    pub total_chunks: usize,
    pub timeline: Option<Arc<[f32]>>,
}

/// Observer of committed residency, called off the asset lock
pub trait ResidencyListener: Send + Sync {
    fn on_residency_changed(&self, change: &ResidencyChange);
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamingStats {
    pub passes: u64,
    pub tasks_spawned: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    pub reschedules: u64,
    pub chunks_committed: u64,
    pub chunks_released: u64,
    pub bytes_committed: u64,
}

/// Outcome of one `update` pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub visited: usize,
    pub spawned: usize,
    /// Target moved while a task was in flight
    pub deferred: usize,
    pub unchanged: usize,
}

pub struct StreamingEngine {
    groups: RwLock<FxHashMap<&'static str, Arc<StreamingGroup>>>,
    resources: Mutex<FxHashMap<AssetId, Weak<Asset>>>,
    usage: Arc<UsageTracker>,
    executor: Arc<dyn TaskExecutor>,
    backends: Backends,
    listeners: RwLock<Vec<Arc<dyn ResidencyListener>>>,
    next_task_id: AtomicU64,
    in_flight: Mutex<usize>,
    idle: Condvar,
    stats: Mutex<StreamingStats>,
}

impl StreamingEngine {
    /// Engine with the built-in `textures` and `audio` groups, unlimited
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        backends: Backends,
        usage: Arc<UsageTracker>,
    ) -> Arc<Self> {
        let mut groups: FxHashMap<&'static str, Arc<StreamingGroup>> = FxHashMap::default();
        groups.insert(
            TEXTURE_GROUP,
            Arc::new(StreamingGroup::new(
                TEXTURE_GROUP,
                Arc::new(MipResidencyPolicy::default()),
                None,
            )),
        );
        groups.insert(
            AUDIO_GROUP,
            Arc::new(StreamingGroup::new(
                AUDIO_GROUP,
                Arc::new(PlaybackResidencyPolicy::default()),
                None,
            )),
        );
        Arc::new(Self {
            groups: RwLock::new(groups),
            resources: Mutex::new(FxHashMap::default()),
            usage,
            executor,
            backends,
            listeners: RwLock::new(Vec::new()),
            next_task_id: AtomicU64::new(1),
            in_flight: Mutex::new(0),
            idle: Condvar::new(),
            stats: Mutex::new(StreamingStats::default()),
        })
    }

    /// Replace the policy and budget of a built-in group
    pub fn configure_group(
        &self,
        name: &str,
        policy: Arc<dyn ResidencyPolicy>,
        budget_bytes: Option<u64>,
    ) -> Result<()> {
        let mut groups = self.groups.write();
        let (&key, _) = groups
            .get_key_value(name)
            .ok_or_else(|| AssetError::Config(format!("unknown streaming group '{name}'")))?;
        groups.insert(key, Arc::new(StreamingGroup::new(key, policy, budget_bytes)));
        Ok(())
    }

    /// Apply `streaming_group_<name>_budget_bytes` settings
    pub fn apply_budgets(&self, budgets: &BTreeMap<String, u64>) {
        for (name, &bytes) in budgets {
            let policy = match self.group(name) {
                Some(group) => Arc::clone(group.policy()),
                None => {
                    warn!(group = %name, "budget configured for unknown streaming group");
                    continue;
                }
            };
            debug!(group = %name, bytes, "streaming group budget");
            if let Err(err) = self.configure_group(name, policy, Some(bytes)) {
                warn!(error = %err, "failed to apply group budget");
            }
        }
    }

    pub fn group(&self, name: &str) -> Option<Arc<StreamingGroup>> {
        self.groups.read().get(name).cloned()
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn add_listener(&self, listener: Arc<dyn ResidencyListener>) {
        self.listeners.write().push(listener);
    }

    /// Start tracking a loaded streamable asset. Taken under the asset lock.
    pub fn register(&self, asset: &Arc<Asset>) {
        trace!(id = %asset.id(), "registered streamable asset");
        self.resources
            .lock()
            .insert(asset.id(), Arc::downgrade(asset));
    }

    /// Stop tracking `asset`; a newer asset with the same id is left alone
    pub fn unregister(&self, asset: &Asset) {
        let removed = {
            let mut resources = self.resources.lock();
            let same = resources
                .get(&asset.id())
                .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), asset));
            same && resources.remove(&asset.id()).is_some()
        };
        if removed {
            for group in self.groups.read().values() {
                group.release(asset.id());
            }
            trace!(id = %asset.id(), "unregistered streamable asset");
        }
    }

    pub fn registered_count(&self) -> usize {
        self.resources.lock().len()
    }

    /// One residency pass over every registered asset
    pub fn update(self: &Arc<Self>) -> UpdateReport {
        let span = debug_span!("streaming_update");
        let _enter = span.enter();

        let usage = self.usage.snapshot();
        let idle = UsageHint::Idle;
        let assets: Vec<Arc<Asset>> = {
            let mut resources = self.resources.lock();
            resources.retain(|_, weak| weak.strong_count() > 0);
            resources.values().filter_map(Weak::upgrade).collect()
        };

        let mut report = UpdateReport::default();
        let mut spawn = Vec::new();
        for asset in &assets {
            report.visited += 1;
            let id = asset.id();
            let mut guard = asset.lock_inner();
            if guard.state != LoadState::Loaded {
                continue;
            }
            let Some(state) = guard.streaming.as_mut() else {
                continue;
            };
            let Some(group) = self.group(state.group) else {
                warn!(%id, group = state.group, "asset in unknown streaming group");
                continue;
            };

            let input = PolicyInput {
                usage: usage.get(&id).unwrap_or(&idle),
                total_chunks: state.total_chunks,
                chunk_sizes: &state.chunk_sizes[..state.total_chunks],
                current: state.current,
                timeline: state.timeline.as_deref(),
                group: group.snapshot_for(id),
            };
            let desired = group
                .policy()
                .desired(&input)
                .intersection(ChunkMask::full(state.total_chunks));
            group.assign(id, state.bytes_of(desired));
            state.target = desired;

            if !state.needs_work() {
                report.unchanged += 1;
                continue;
            }
            if state.task.is_some() {
                trace!(%id, target = ?desired, "task in flight, target updated");
                report.deferred += 1;
                continue;
            }
            if let Some(task) = self.prepare_task(id, state) {
                spawn.push((Arc::downgrade(asset), task));
                report.spawned += 1;
            }
        }
        self.stats.lock().passes += 1;

        for (weak, task) in spawn {
            self.submit(weak, task);
        }
        report
    }

    /// Plan a task for the stored target and submit it, if work remains
    /// and nothing is in flight. Returns whether a task was submitted.
    pub fn schedule(self: &Arc<Self>, asset: &Arc<Asset>) -> bool {
        let task = {
            let mut guard = asset.lock_inner();
            if guard.state != LoadState::Loaded {
                return false;
            }
            match guard.streaming.as_mut() {
                Some(state) if state.task.is_none() && state.needs_work() => {
                    self.prepare_task(asset.id(), state)
                }
                _ => None,
            }
        };
        match task {
            Some(task) => {
                self.submit(Arc::downgrade(asset), task);
                true
            }
            None => false,
        }
    }

    pub(super) fn prepare_task(&self, id: AssetId, state: &mut StreamingState) -> Option<Arc<TaskHandle>> {
        let queue = plan_queue(
            state.current,
            state.allocated,
            state.target,
            state.order,
            state.total_chunks,
        );
        if queue.is_empty() {
            return None;
        }
        let task = Arc::new(TaskHandle::new(
            self.next_task_id.fetch_add(1, Ordering::Relaxed),
            id,
        ));
        debug!(%id, task = task.id(), queued = queue.len(), target = ?state.target, "streaming task planned");
        state.queue = queue;
        state.task = Some(Arc::clone(&task));
        *self.in_flight.lock() += 1;
        self.stats.lock().tasks_spawned += 1;
        Some(task)
    }

    pub(super) fn submit(self: &Arc<Self>, asset: Weak<Asset>, handle: Arc<TaskHandle>) {
        let engine = Arc::clone(self);
        self.executor
            .spawn(Box::new(move || task::execute(&engine, asset, handle)));
    }

    /// Cancel the asset's in-flight task and block until it has finalized
    /// and released its provisional slots
    ///
    /// The flag is raised under the asset lock, so a finishing task either
    /// sees it or has already handed the slot to its follow-up task, which
    /// is the one cancelled here.
    pub fn cancel_streaming_tasks(&self, asset: &Asset) {
        let task = {
            let inner = asset.lock_inner();
            let task = inner.streaming.as_ref().and_then(|state| state.task.clone());
            if let Some(task) = &task {
                debug!(id = %asset.id(), task = task.id(), "cancelling streaming task");
                task.cancel();
            }
            task
        };
        if let Some(task) = task {
            task.wait();
        }
    }

    /// Block until no task is in flight. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            if self.idle.wait_until(&mut in_flight, deadline).timed_out() {
                return *in_flight == 0;
            }
        }
        true
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    pub fn stats(&self) -> StreamingStats {
        self.stats.lock().clone()
    }

    pub(crate) fn notify_listeners(&self, change: &ResidencyChange) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_residency_changed(change);
        }
    }

    fn record_outcome(&self, outcome: &Result<()>, progress: &task::TaskProgress) {
        let mut stats = self.stats.lock();
        match outcome {
            Ok(()) => stats.tasks_completed += 1,
            Err(AssetError::Cancelled) => stats.tasks_cancelled += 1,
            Err(_) => stats.tasks_failed += 1,
        }
        stats.chunks_committed += progress.committed.count() as u64;
        stats.chunks_released += progress.released.count() as u64;
        stats.bytes_committed += progress.bytes;
    }

    fn record_reschedule(&self) {
        self.stats.lock().reschedules += 1;
    }

    fn task_done(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }
}

impl std::fmt::Debug for StreamingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingEngine")
            .field("registered", &self.registered_count())
            .field("in_flight", &self.in_flight())
            .field("backends", &self.backends)
            .finish()
    }
}
