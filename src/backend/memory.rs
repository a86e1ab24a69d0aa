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

//! Host-memory backend

use super::{ResourceBackend, SlotDesc, SlotId};
use crate::error::{AssetError, Result};
use parking_lot::Mutex;
use slotmap::{new_key_type, Key, KeyData, SlotMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::trace;

new_key_type! {
    struct SlotKey;
}

struct SlotEntry {
    desc: SlotDesc,
    data: Vec<u8>,
}

#[derive(Default)]
struct SlotTable {
    slots: SlotMap<SlotKey, SlotEntry>,
    reserved: usize,
}

/// Operation counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub slots_created: u64,
    pub slots_deleted: u64,
    pub writes: u64,
    pub bytes_written: u64,
    pub failed_operations: u64,
    /// Highest number of `write_slot` calls observed in flight at once
    pub peak_concurrent_writes: usize,
}

/// Slot table in host memory with byte accounting.
///
/// Used headless and in tests: it can cap its reservation, simulate slow
/// uploads and inject failures.
pub struct MemoryBackend {
    name: String,
    table: Mutex<SlotTable>,
    capacity: Option<usize>,
    spatial_multichannel: bool,
    write_delay: Option<Duration>,
    fail_creates: AtomicUsize,
    fail_writes: AtomicUsize,
    active_writes: AtomicUsize,
    stats: Mutex<BackendStats>,
}

fn slot_id(key: SlotKey) -> SlotId {
    SlotId::from_raw(key.data().as_ffi())
}

fn slot_key(slot: SlotId) -> SlotKey {
    KeyData::from_ffi(slot.raw()).into()
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: Mutex::new(SlotTable::default()),
            capacity: None,
            spatial_multichannel: true,
            write_delay: None,
            fail_creates: AtomicUsize::new(0),
            fail_writes: AtomicUsize::new(0),
            active_writes: AtomicUsize::new(0),
            stats: Mutex::new(BackendStats::default()),
        }
    }

    /// Refuse slots once `bytes` are reserved
    pub fn with_capacity(mut self, bytes: usize) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Report that 3-D clips need a mono down-mix
    pub fn without_spatial_multichannel(mut self) -> Self {
        self.spatial_multichannel = false;
        self
    }

    /// Sleep inside every `write_slot`
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Make the next `count` slot creations fail
    pub fn fail_next_creates(&self, count: usize) {
        self.fail_creates.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` slot writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    pub fn reserved_bytes(&self) -> usize {
        self.table.lock().reserved
    }

    pub fn slot_data(&self, slot: SlotId) -> Option<Vec<u8>> {
        self.table
            .lock()
            .slots
            .get(slot_key(slot))
            .map(|entry| entry.data.clone())
    }

    pub fn slot_desc(&self, slot: SlotId) -> Option<SlotDesc> {
        self.table
            .lock()
            .slots
            .get(slot_key(slot))
            .map(|entry| entry.desc)
    }

    pub fn stats(&self) -> BackendStats {
        self.stats.lock().clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn record_failure(&self, err: AssetError) -> AssetError {
        self.stats.lock().failed_operations += 1;
        err
    }
}

impl ResourceBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_slot(&self, desc: &SlotDesc) -> Result<SlotId> {
        if Self::take_failure(&self.fail_creates) {
            return Err(self.record_failure(AssetError::Backend(format!(
                "{}: injected create failure",
                self.name
            ))));
        }

        let size = desc.byte_size();
        let mut table = self.table.lock();
        if let Some(capacity) = self.capacity {
            if table.reserved + size > capacity {
                let err = AssetError::Backend(format!(
                    "{}: out of memory: {} + {} > {}",
                    self.name, table.reserved, size, capacity
                ));
                drop(table);
                return Err(self.record_failure(err));
            }
        }
        table.reserved += size;
        let key = table.slots.insert(SlotEntry {
            desc: *desc,
            data: Vec::new(),
        });
        drop(table);

        self.stats.lock().slots_created += 1;
        let slot = slot_id(key);
        trace!(backend = %self.name, ?slot, size, "slot created");
        Ok(slot)
    }

    fn write_slot(&self, slot: SlotId, bytes: &[u8]) -> Result<()> {
        let active = self.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut stats = self.stats.lock();
            stats.peak_concurrent_writes = stats.peak_concurrent_writes.max(active);
        }
        if let Some(delay) = self.write_delay {
            thread::sleep(delay);
        }

        let result = if Self::take_failure(&self.fail_writes) {
            Err(AssetError::Backend(format!(
                "{}: injected write failure",
                self.name
            )))
        } else {
            let mut table = self.table.lock();
            match table.slots.get_mut(slot_key(slot)) {
                None => Err(AssetError::Backend(format!(
                    "{}: write to unknown slot {slot:?}",
                    self.name
                ))),
                Some(entry) => {
                    let expected = match entry.desc {
                        SlotDesc::AudioBuffer(_) => None,
                        other => Some(other.byte_size()),
                    };
                    match expected {
                        Some(expected) if expected != bytes.len() => {
                            Err(AssetError::Backend(format!(
                                "{}: slot expects {expected} bytes, got {}",
                                self.name,
                                bytes.len()
                            )))
                        }
                        _ => {
                            entry.data.clear();
                            entry.data.extend_from_slice(bytes);
                            Ok(())
                        }
                    }
                }
            }
        };
        self.active_writes.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(()) => {
                let mut stats = self.stats.lock();
                stats.writes += 1;
                stats.bytes_written += bytes.len() as u64;
                Ok(())
            }
            Err(err) => Err(self.record_failure(err)),
        }
    }

    fn delete_slot(&self, slot: SlotId) -> Result<()> {
        let mut table = self.table.lock();
        match table.slots.remove(slot_key(slot)) {
            Some(entry) => {
                table.reserved -= entry.desc.byte_size();
                drop(table);
                self.stats.lock().slots_deleted += 1;
                trace!(backend = %self.name, ?slot, "slot deleted");
                Ok(())
            }
            None => {
                drop(table);
                Err(self.record_failure(AssetError::Backend(format!(
                    "{}: delete of unknown slot {slot:?}",
                    self.name
                ))))
            }
        }
    }

    fn live_slots(&self) -> usize {
        self.table.lock().slots.len()
    }

    fn supports_spatial_multichannel(&self) -> bool {
        self.spatial_multichannel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_desc(size: usize) -> SlotDesc {
        SlotDesc::Bytes { size }
    }

    #[test]
    fn test_slot_lifecycle() {
        let backend = MemoryBackend::new("test");
        let slot = backend.create_slot(&bytes_desc(4)).unwrap();
        assert!(!slot.is_null());
        assert_eq!(backend.live_slots(), 1);
        assert_eq!(backend.reserved_bytes(), 4);

        backend.write_slot(slot, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.slot_data(slot), Some(vec![1, 2, 3, 4]));

        backend.delete_slot(slot).unwrap();
        assert_eq!(backend.live_slots(), 0);
        assert_eq!(backend.reserved_bytes(), 0);
        assert!(backend.delete_slot(slot).is_err());
    }

    #[test]
    fn test_null_slot_rejected() {
        let backend = MemoryBackend::new("test");
        assert!(backend.write_slot(SlotId::NULL, &[]).is_err());
        assert!(backend.delete_slot(SlotId::NULL).is_err());
    }

    #[test]
    fn test_size_mismatch() {
        let backend = MemoryBackend::new("test");
        let slot = backend.create_slot(&bytes_desc(8)).unwrap();
        assert!(backend.write_slot(slot, &[0u8; 4]).is_err());
        assert_eq!(backend.stats().failed_operations, 1);
    }

    #[test]
    fn test_capacity_overflow() {
        let backend = MemoryBackend::new("test").with_capacity(100);
        backend.create_slot(&bytes_desc(60)).unwrap();
        assert!(backend.create_slot(&bytes_desc(60)).is_err());
        assert_eq!(backend.live_slots(), 1);
    }

    #[test]
    fn test_failure_injection() {
        let backend = MemoryBackend::new("test");
        backend.fail_next_creates(1);
        assert!(backend.create_slot(&bytes_desc(1)).is_err());
        let slot = backend.create_slot(&bytes_desc(1)).unwrap();
        backend.fail_next_writes(1);
        assert!(backend.write_slot(slot, &[1]).is_err());
        backend.write_slot(slot, &[1]).unwrap();
    }
}
