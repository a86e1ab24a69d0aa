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

//! Streaming task handle and body
//!
//! A task runs as a plain job with explicit re-acquire points:
//!
//! 1. lock the asset, allocate slots for growth, release slots for shrink
//! 2. unlock, read chunk bytes from storage
//! 3. relock, decode and commit
//! 4. clear the task, notify listeners, reschedule if the target moved
//!
//! Between steps the task only holds a `Weak<Asset>` and re-checks its
//! cancel flag.

use super::residency::{ChunkMask, ChunkOp};
use super::{ResidencyChange, StreamingEngine};
use crate::asset::{Asset, LoadState};
use crate::container::MAX_CHUNKS;
use crate::error::{AssetError, Result};
use crate::id::AssetId;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, debug_span, warn};

/// Shared handle to one in-flight streaming task
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    asset: AssetId,
    cancelled: AtomicBool,
    finished: Mutex<bool>,
    done: Condvar,
}

impl TaskHandle {
    pub(crate) fn new(id: u64, asset: AssetId) -> Self {
        Self {
            id,
            asset,
            cancelled: AtomicBool::new(false),
            finished: Mutex::new(false),
            done: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn asset(&self) -> AssetId {
        self.asset
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock()
    }

    pub(crate) fn finish(&self) {
        let mut finished = self.finished.lock();
        *finished = true;
        self.done.notify_all();
    }

    /// Block until the task has finalized
    pub fn wait(&self) {
        let mut finished = self.finished.lock();
        while !*finished {
            self.done.wait(&mut finished);
        }
    }

    /// Returns `false` on timeout
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut finished = self.finished.lock();
        if !*finished {
            self.done.wait_while_for(&mut finished, |done| !*done, timeout);
        }
        *finished
    }
}

#[derive(Debug, Default)]
pub(super) struct TaskProgress {
    pub committed: ChunkMask,
    pub released: ChunkMask,
    pub bytes: u64,
}

type Fetched = SmallVec<[(usize, Arc<[u8]>); MAX_CHUNKS]>;

fn check(task: &TaskHandle) -> Result<()> {
    if task.is_cancelled() {
        Err(AssetError::Cancelled)
    } else {
        Ok(())
    }
}

/// Release slots created by this task after a failure off-lock
fn rollback(asset: &Weak<Asset>, provisional: ChunkMask, err: AssetError) -> AssetError {
    if let Some(asset) = asset.upgrade() {
        if let Some(state) = asset.lock_inner().streaming.as_mut() {
            state.release_mask(provisional);
        }
    }
    err
}

fn run(
    engine: &StreamingEngine,
    weak: &Weak<Asset>,
    task: &TaskHandle,
    progress: &mut TaskProgress,
) -> Result<()> {
    let asset = weak.upgrade().ok_or(AssetError::Cancelled)?;
    let mut provisional = ChunkMask::EMPTY;
    let mut loads: SmallVec<[usize; MAX_CHUNKS]> = SmallVec::new();

    let storage = {
        let mut guard = asset.lock_inner();
        check(task)?;
        if guard.state != LoadState::Loaded {
            return Err(AssetError::Cancelled);
        }
        let inner = &mut *guard;
        let storage = inner
            .storage
            .clone()
            .ok_or_else(|| AssetError::InvalidState("streamable asset has no storage".into()))?;
        let state = inner
            .streaming
            .as_mut()
            .ok_or_else(|| AssetError::InvalidState("asset is not streamable".into()))?;
        let queue = state.queue.clone();

        for item in queue.iter().filter(|q| q.op == ChunkOp::Load) {
            if !state.allocated.contains(item.index) {
                let allocated = inner
                    .payload
                    .slot_desc(item.index)
                    .and_then(|desc| state.allocate(item.index, &desc));
                if let Err(err) = allocated {
                    state.release_mask(provisional);
                    return Err(err);
                }
                provisional.insert(item.index);
            }
            loads.push(item.index);
        }

        for item in queue.iter().filter(|q| q.op == ChunkOp::Release) {
            state.release(item.index);
            progress.released.insert(item.index);
        }
        storage
    };
    drop(asset);

    let _pin = storage.pin();
    let fetch = || -> Result<Fetched> {
        let mut fetched = Fetched::new();
        for &index in &loads {
            check(task)?;
            fetched.push((index, storage.load_chunk(index)?));
        }
        Ok(fetched)
    };
    let fetched = match fetch() {
        Ok(fetched) => fetched,
        Err(err) => return Err(rollback(weak, provisional, err)),
    };

    // Slots were dropped along with the asset if this fails
    let asset = weak.upgrade().ok_or(AssetError::Cancelled)?;
    let mut guard = asset.lock_inner();
    let inner = &mut *guard;
    let Some(state) = inner.streaming.as_mut() else {
        return Err(AssetError::Cancelled);
    };
    if task.is_cancelled() || inner.state != LoadState::Loaded {
        state.release_mask(provisional);
        return Err(AssetError::Cancelled);
    }

    let ctx = engine.backends().decode_context();
    let mut decoded = Fetched::new();
    for (index, bytes) in &fetched {
        match inner.payload.decode_chunk(*index, bytes, &ctx) {
            Ok(data) => decoded.push((*index, data)),
            Err(err) => {
                state.release_mask(provisional);
                return Err(err);
            }
        }
    }
    for (index, data) in &decoded {
        if let Err(err) = state.backend.write_slot(state.slots[*index], data) {
            state.release_mask(provisional);
            return Err(err);
        }
    }
    for (index, data) in &decoded {
        state.current.insert(*index);
        progress.committed.insert(*index);
        progress.bytes += data.len() as u64;
    }
    Ok(())
}

/// Job body submitted to the executor
pub(super) fn execute(engine: &Arc<StreamingEngine>, weak: Weak<Asset>, task: Arc<TaskHandle>) {
    let span = debug_span!("streaming_task", task = task.id(), asset = %task.asset());
    let _enter = span.enter();

    let mut progress = TaskProgress::default();
    let outcome = run(engine, &weak, &task, &mut progress);

    let mut change = None;
    let mut reschedule = None;
    let mut failures = 0;
    if let Some(asset) = weak.upgrade() {
        let mut guard = asset.lock_inner();
        let loaded = guard.state == LoadState::Loaded;
        if let Some(state) = guard.streaming.as_mut() {
            if state.task.as_ref().is_some_and(|t| Arc::ptr_eq(t, &task)) {
                state.task = None;
                state.queue.clear();
            }
            debug_assert!(state.invariants_hold(), "residency invariants broken: {state:?}");
            state.failures = match &outcome {
                Ok(()) | Err(AssetError::Cancelled) => 0,
                Err(_) => state.failures + 1,
            };
            failures = state.failures;
            if !progress.committed.is_empty() || !progress.released.is_empty() {
                change = Some(ResidencyChange {
                    asset: task.asset(),
                    committed: progress.committed,
                    released: progress.released,
                    current: state.current,
                    total_chunks: state.total_chunks,
                    timeline: state.timeline.clone(),
                });
            }
            // The follow-up takes the task slot before the lock drops
            if outcome.is_ok() && loaded && !task.is_cancelled() && state.needs_work() {
                if let Some(next) = engine.prepare_task(task.asset(), state) {
                    reschedule = Some(next);
                }
            }
        }
    }

    match &outcome {
        Ok(()) => debug!(
            committed = ?progress.committed,
            released = ?progress.released,
            bytes = progress.bytes,
            "streaming task finished"
        ),
        Err(AssetError::Cancelled) => debug!("streaming task cancelled"),
        Err(err) => warn!(error = %err, failures, "streaming task failed"),
    }
    engine.record_outcome(&outcome, &progress);
    task.finish();

    if let Some(change) = change {
        engine.notify_listeners(&change);
    }
    if let Some(next) = reschedule {
        debug!(next = next.id(), "target moved during task, rescheduling");
        engine.record_reschedule();
        engine.submit(weak, next);
    }
    engine.task_done();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_task_handle_wait() {
        let handle = Arc::new(TaskHandle::new(1, AssetId::generate()));
        assert!(!handle.wait_timeout(Duration::from_millis(5)));

        let h = handle.clone();
        let worker = thread::spawn(move || {
            while !h.is_cancelled() {
                thread::yield_now();
            }
            h.finish();
        });
        handle.cancel();
        handle.wait();
        assert!(handle.is_finished());
        worker.join().unwrap();
    }
}
