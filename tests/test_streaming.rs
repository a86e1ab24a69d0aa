mod common;

use archetype_assets::prelude::*;
use archetype_assets::{ResidencySnapshot, ResourceBackend};
use common::{inline_runtime, large_texture, pooled_runtime, texture_container, texture_header};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

fn assert_invariants(snapshot: &ResidencySnapshot) {
    assert!(snapshot.current.is_subset(snapshot.allocated), "{snapshot:?}");
    assert!(snapshot.allocated_count() <= snapshot.total_chunks, "{snapshot:?}");
    // Mips commit atomically, so the resident set is always a coarse suffix
    assert_eq!(
        snapshot.current,
        ChunkMask::suffix(snapshot.total_chunks, snapshot.current_count()),
        "{snapshot:?}"
    );
}

#[test]
fn test_streaming_growth_to_full() {
    let t = inline_runtime(AssetConfig::default());
    let id = AssetId::generate();
    t.install("tex.sbac", &large_texture(id, true));
    let handle = t.runtime.manager().get_or_load(id).unwrap();
    t.runtime.manager().wait_for_loaded(&handle).unwrap();
    assert_eq!(handle.residency().unwrap().current_count(), 0);

    t.runtime.set_usage(id, UsageHint::visible(1.0));
    let report = t.runtime.update();
    assert_eq!(report.spawned, 1);

    let snapshot = handle.residency().unwrap();
    assert_eq!(snapshot.current_count(), snapshot.total_chunks);
    assert!(!snapshot.task_in_flight);
    assert_eq!(t.textures.live_slots(), 10);

    let stats = t.runtime.engine().stats();
    assert_eq!(stats.tasks_spawned, 1);
    assert_eq!(stats.tasks_completed, 1);
    assert_eq!(stats.chunks_committed, 10);

    // Nothing left to do on the next pass
    let report = t.runtime.update();
    assert_eq!(report.spawned, 0);
    assert_eq!(report.unchanged, 1);
}

#[test]
fn test_at_most_one_task_in_flight() {
    let t = pooled_runtime(AssetConfig::default(), 4, Duration::from_millis(2));
    let id = AssetId::generate();
    t.install("tex.sbac", &texture_container(id, &texture_header(128, 128, 8, true)));
    let handle = t.runtime.manager().get_or_load(id).unwrap();
    t.runtime.manager().wait_for_loaded(&handle).unwrap();
    assert!(t.runtime.manager().wait_idle(IDLE_TIMEOUT));

    let done = Arc::new(AtomicBool::new(false));
    let watcher = {
        let asset = Arc::clone(handle.asset());
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut samples = 0;
            while !done.load(Ordering::SeqCst) {
                if let Some(snapshot) = asset.residency() {
                    assert_invariants(&snapshot);
                    samples += 1;
                }
                thread::yield_now();
            }
            samples
        })
    };

    t.runtime.set_usage(id, UsageHint::visible(0.25));
    let first = t.runtime.update();
    assert_eq!(first.spawned, 1);

    thread::sleep(Duration::from_millis(1));
    t.runtime.set_usage(id, UsageHint::visible(1.0));
    let second = t.runtime.update();
    // Either the first task is still running and the new target waits for
    // it, or it finished and exactly one new task starts
    assert_eq!(second.spawned + second.deferred, 1);

    assert!(t.runtime.engine().wait_idle(IDLE_TIMEOUT));
    done.store(true, Ordering::SeqCst);
    assert!(watcher.join().unwrap() > 0);

    let snapshot = handle.residency().unwrap();
    assert_invariants(&snapshot);
    assert_eq!(snapshot.current, snapshot.target);
    assert_eq!(snapshot.current_count(), 8);
    assert_eq!(snapshot.allocated, snapshot.current);

    let stats = t.runtime.engine().stats();
    assert_eq!(
        stats.tasks_spawned,
        stats.tasks_completed + stats.tasks_failed + stats.tasks_cancelled
    );
    assert_eq!(t.runtime.engine().in_flight(), 0);
}

#[test]
fn test_unload_during_streaming() {
    let t = pooled_runtime(AssetConfig::default(), 2, Duration::from_millis(20));
    let id = AssetId::generate();
    t.install("tex.sbac", &texture_container(id, &texture_header(64, 64, 7, true)));
    let handle = t.runtime.manager().get_or_load(id).unwrap();
    t.runtime.manager().wait_for_loaded(&handle).unwrap();

    t.runtime.set_usage(id, UsageHint::visible(1.0));
    assert_eq!(t.runtime.update().spawned, 1);

    let asset = Arc::clone(handle.asset());
    assert!(t.runtime.manager().unload(handle).unwrap());
    assert_eq!(asset.state(), LoadState::Unloaded);

    let waiter = {
        let asset = Arc::clone(&asset);
        thread::spawn(move || asset.wait_loaded())
    };
    let result = waiter.join().unwrap();
    assert!(result.unwrap_err().is_cancelled());

    assert!(t.runtime.engine().wait_idle(IDLE_TIMEOUT));
    assert_eq!(t.textures.live_slots(), 0);
    assert_eq!(t.textures.reserved_bytes(), 0);
    assert!(asset.residency().is_none());
    assert_eq!(t.runtime.engine().registered_count(), 0);
}

#[test]
fn test_cancel_keeps_residency_consistent() {
    let t = pooled_runtime(AssetConfig::default(), 2, Duration::from_millis(5));
    let id = AssetId::generate();
    t.install("tex.sbac", &texture_container(id, &texture_header(64, 64, 7, true)));
    let handle = t.runtime.manager().get_or_load(id).unwrap();
    t.runtime.manager().wait_for_loaded(&handle).unwrap();

    t.runtime.set_usage(id, UsageHint::visible(1.0));
    t.runtime.update();
    thread::sleep(Duration::from_millis(2));
    t.runtime.engine().cancel_streaming_tasks(handle.asset());

    // Cancellation is synchronous
    let snapshot = handle.residency().unwrap();
    assert!(!snapshot.task_in_flight);
    assert_invariants(&snapshot);
    assert_eq!(snapshot.allocated, snapshot.current);
    assert_eq!(t.textures.live_slots(), snapshot.current_count());
    assert!(handle.is_loaded());

    // The next pass picks the work back up
    t.runtime.update();
    assert!(t.runtime.engine().wait_idle(IDLE_TIMEOUT));
    assert!(handle.residency().unwrap().is_fully_resident());
}

#[test]
fn test_cancel_while_target_moves_leaves_nothing_running() {
    let t = pooled_runtime(AssetConfig::default(), 2, Duration::from_millis(1));
    let id = AssetId::generate();
    t.install("tex.sbac", &texture_container(id, &texture_header(128, 128, 8, true)));
    let handle = t.runtime.manager().get_or_load(id).unwrap();
    t.runtime.manager().wait_for_loaded(&handle).unwrap();

    for _ in 0..10 {
        t.runtime.set_usage(id, UsageHint::visible(0.25));
        t.runtime.update();
        assert!(t.runtime.engine().wait_idle(IDLE_TIMEOUT));

        t.runtime.set_usage(id, UsageHint::visible(1.0));
        t.runtime.update();
        t.runtime.set_usage(id, UsageHint::visible(0.75));
        t.runtime.update();
        t.runtime.engine().cancel_streaming_tasks(handle.asset());

        let cancelled = handle.residency().unwrap();
        assert!(!cancelled.task_in_flight);
        assert_invariants(&cancelled);

        // No follow-up task may run once the cancel has returned
        assert!(t.runtime.engine().wait_idle(IDLE_TIMEOUT));
        let settled = handle.residency().unwrap();
        assert_eq!(settled.current, cancelled.current);
        assert_eq!(settled.allocated, cancelled.allocated);
        assert_eq!(t.textures.live_slots(), settled.allocated_count());
    }
}

#[test]
fn test_shrink_releases_finest_mips_first() {
    let t = inline_runtime(AssetConfig::default());
    let id = AssetId::generate();
    t.install("tex.sbac", &large_texture(id, true));
    let handle = t.runtime.manager().get_or_load(id).unwrap();

    t.runtime.set_usage(id, UsageHint::Pinned);
    t.runtime.update();
    let finest = handle.slot(0);
    assert!(!finest.is_null());

    t.runtime.set_usage(id, UsageHint::visible(0.5));
    t.runtime.update();
    assert_eq!(handle.residency().unwrap().current, ChunkMask::suffix(10, 5));
    assert!(handle.slot(0).is_null());
    assert!(t.textures.slot_data(finest).is_none());
    assert!(!handle.slot(9).is_null());
}

#[test]
fn test_budget_shared_between_textures() {
    let header = texture_header(16, 16, 5, true);
    // one full chain is 1364 bytes
    let t = inline_runtime(AssetConfig::default().with_group_budget("textures", 1500));
    let a = AssetId::generate();
    let b = AssetId::generate();
    t.install("a.sbac", &texture_container(a, &header));
    t.install("b.sbac", &texture_container(b, &header));
    let ha = t.runtime.manager().get_or_load(a).unwrap();
    let hb = t.runtime.manager().get_or_load(b).unwrap();

    t.runtime.set_usage(a, UsageHint::Pinned);
    t.runtime.set_usage(b, UsageHint::Pinned);
    t.runtime.update();

    let total = ha.residency().unwrap().current_count() + hb.residency().unwrap().current_count();
    assert!(total < 10);
    assert!(t.textures.reserved_bytes() <= 1500);
    assert_eq!(
        t.runtime.engine().group("textures").unwrap().used_bytes() as usize,
        t.textures.reserved_bytes()
    );
}
