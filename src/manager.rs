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

//! Asset lifecycle manager
//!
//! Owns the id -> asset map. `get_or_load` hands out the same `Asset` to
//! every caller and queues exactly one load job for it; the job runs the
//! whole `Unloaded -> Loaded` transition under the asset lock and only
//! calls back into the manager (for dependencies) after releasing it.

use crate::asset::{Asset, AssetHandle, AssetInner, LoadContext, LoadOutcome, LoadState};
use crate::config::AssetConfig;
use crate::container::{AssetHeader, FILE_EXTENSION};
use crate::error::{AssetError, Result};
use crate::executor::TaskExecutor;
use crate::factory::FactoryRegistry;
use crate::id::{AssetId, TypeName};
use crate::storage::Storage;
use crate::streaming::StreamingEngine;
use crate::upgrade::{run_upgrade, UpgradeOptions};
use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::hash_map::Entry;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, trace, warn};
use walkdir::WalkDir;

/// Where a container lives and what it holds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentEntry {
    pub path: PathBuf,
    pub type_name: TypeName,
}

fn read_preamble(path: &Path) -> Result<AssetHeader> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    AssetHeader::read_from(&mut BufReader::new(file), Some(len))
}

/// Id -> container path lookup
#[derive(Debug, Default)]
pub struct ContentIndex {
    entries: RwLock<FxHashMap<AssetId, ContentEntry>>,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every container under `root`, reading only preambles.
    /// Unreadable files are logged and skipped. Returns how many were added.
    pub fn mount(&self, root: impl AsRef<Path>) -> Result<usize> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(AssetError::Io(format!("{} is not a directory", root.display())));
        }
        let mut added = 0;
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_container = entry.file_type().is_file()
                && path.extension().is_some_and(|ext| ext == FILE_EXTENSION);
            if !is_container {
                continue;
            }
            match read_preamble(path) {
                Ok(header) => {
                    self.register(header.id, path.to_path_buf(), header.type_name);
                    added += 1;
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable container"),
            }
        }
        info!(root = %root.display(), added, "mounted content");
        Ok(added)
    }

    /// Index one container by reading its preamble
    pub fn register_path(&self, path: impl AsRef<Path>) -> Result<AssetId> {
        let path = path.as_ref();
        let header = read_preamble(path)?;
        self.register(header.id, path.to_path_buf(), header.type_name);
        Ok(header.id)
    }

    pub fn register(&self, id: AssetId, path: PathBuf, type_name: TypeName) {
        if let Some(previous) = self
            .entries
            .write()
            .insert(id, ContentEntry { path, type_name })
        {
            debug!(%id, previous = %previous.path.display(), "content entry replaced");
        }
    }

    pub fn lookup(&self, id: AssetId) -> Option<ContentEntry> {
        self.entries.read().get(&id).cloned()
    }

    pub fn remove(&self, id: AssetId) -> Option<ContentEntry> {
        self.entries.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Reverse dependency edges: dependency -> loaded parents holding it
#[derive(Debug, Default)]
struct DependencyGraph {
    dependents: FxHashMap<AssetId, FxHashSet<AssetId>>,
}

impl DependencyGraph {
    fn link(&mut self, parent: AssetId, dependency: AssetId) {
        self.dependents.entry(dependency).or_default().insert(parent);
    }

    fn unlink(&mut self, parent: AssetId, dependency: AssetId) {
        if let Entry::Occupied(mut entry) = self.dependents.entry(dependency) {
            entry.get_mut().remove(&parent);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Every asset that holds `id`, directly or through other dependents
    fn holders(&self, id: AssetId) -> FxHashSet<AssetId> {
        let mut seen = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            for &parent in self.dependents.get(&next).into_iter().flatten() {
                if parent != id && seen.insert(parent) {
                    stack.push(parent);
                }
            }
        }
        seen
    }

    fn clear(&mut self) {
        self.dependents.clear();
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub loads_started: u64,
    pub loads_succeeded: u64,
    pub loads_failed: u64,
    pub upgrades: u64,
    pub unloads: u64,
    pub virtual_created: u64,
}

pub struct AssetManager {
    registry: FactoryRegistry,
    index: ContentIndex,
    assets: Mutex<FxHashMap<AssetId, Arc<Asset>>>,
    graph: Mutex<DependencyGraph>,
    engine: Arc<StreamingEngine>,
    executor: Arc<dyn TaskExecutor>,
    options: UpgradeOptions,
    pending: Mutex<usize>,
    idle: Condvar,
    stats: Mutex<ManagerStats>,
}

impl AssetManager {
    pub fn new(
        registry: FactoryRegistry,
        engine: Arc<StreamingEngine>,
        executor: Arc<dyn TaskExecutor>,
        config: &AssetConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            index: ContentIndex::new(),
            assets: Mutex::new(FxHashMap::default()),
            graph: Mutex::new(DependencyGraph::default()),
            engine,
            executor,
            options: UpgradeOptions {
                allow_file_upgrade: config.allow_file_upgrade,
                verification: config.verification,
            },
            pending: Mutex::new(0),
            idle: Condvar::new(),
            stats: Mutex::new(ManagerStats::default()),
        })
    }

    pub fn index(&self) -> &ContentIndex {
        &self.index
    }

    pub fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<StreamingEngine> {
        &self.engine
    }

    pub fn mount(&self, root: impl AsRef<Path>) -> Result<usize> {
        self.index.mount(root)
    }

    /// Resident asset for `id`, or a fresh shell with one load job queued
    pub fn get_or_load(self: &Arc<Self>, id: AssetId) -> Result<AssetHandle> {
        if let Some(asset) = self.assets.lock().get(&id) {
            return Ok(AssetHandle::new(Arc::clone(asset)));
        }

        let entry = self.index.lookup(id).ok_or(AssetError::NotFound(id))?;
        let factory = self.registry.get(entry.type_name.as_str())?;
        let shell = factory.create(id, Some(entry.path));
        shell.lock_inner().load_queued = true;

        let (asset, inserted) = match self.assets.lock().entry(id) {
            Entry::Occupied(existing) => (Arc::clone(existing.get()), false),
            Entry::Vacant(slot) => (Arc::clone(slot.insert(shell)), true),
        };
        let handle = AssetHandle::new(Arc::clone(&asset));
        if inserted {
            trace!(%id, "asset shell created");
            self.enqueue_load(asset);
        }
        Ok(handle)
    }

    /// Index `path` and load the container it holds
    pub fn get_or_load_path(self: &Arc<Self>, path: impl AsRef<Path>) -> Result<AssetHandle> {
        let id = self.index.register_path(path)?;
        self.get_or_load(id)
    }

    pub fn get(&self, id: AssetId) -> Option<AssetHandle> {
        self.assets
            .lock()
            .get(&id)
            .map(|asset| AssetHandle::new(Arc::clone(asset)))
    }

    /// Asset with no backing file, loaded before this returns
    pub fn create_virtual(&self, type_name: &str) -> Result<AssetHandle> {
        let factory = self.registry.get(type_name)?;
        if !factory.supports_virtual() {
            return Err(AssetError::InvalidState(format!(
                "{type_name} does not support virtual assets"
            )));
        }
        let id = AssetId::generate();
        let asset = factory.create(id, None);
        let mut header = AssetHeader::new(
            id,
            factory.type_name().clone(),
            factory.current_serialized_version(),
        );
        header.custom_data = asset.kind().init_virtual()?;

        {
            let mut guard = asset.lock_inner();
            let inner = &mut *guard;
            inner.payload = asset.kind().init(&header)?;
            inner.state = LoadState::Loading;
            let mut ctx = LoadContext {
                id,
                header: &header,
                storage: None,
                payload: &mut inner.payload,
                streaming: &mut inner.streaming,
                backends: self.engine.backends(),
            };
            asset.kind().load(&mut ctx)?;
            inner.header = Some(Arc::new(header));
            inner.state = LoadState::Loaded;
        }

        self.assets.lock().insert(id, Arc::clone(&asset));
        self.stats.lock().virtual_created += 1;
        debug!(%id, type_name, "virtual asset created");
        Ok(AssetHandle::new(asset))
    }

    pub fn wait_for_loaded(&self, handle: &AssetHandle) -> Result<()> {
        handle.wait_loaded()
    }

    /// `None` on timeout
    pub fn wait_for_loaded_timeout(&self, handle: &AssetHandle, timeout: Duration) -> Option<Result<()>> {
        handle.wait_loaded_timeout(timeout)
    }

    /// Unload once `handle` was the last external reference. Returns
    /// `false` when other handles keep the asset alive, directly or through
    /// a loaded parent that depends on it. Parents reachable only through
    /// dependency cycles do not count.
    pub fn unload(&self, handle: AssetHandle) -> Result<bool> {
        let asset = Arc::clone(handle.asset());
        drop(handle);
        if asset.external_refs() > 0 {
            trace!(id = %asset.id(), refs = asset.external_refs(), "unload deferred, asset still referenced");
            return Ok(false);
        }
        if self.is_held(asset.id()) {
            trace!(id = %asset.id(), "unload deferred, a referenced parent depends on it");
            return Ok(false);
        }
        self.unload_asset(&asset);
        Ok(true)
    }

    /// Tear the asset down and queue a fresh load from disk
    pub fn reload(self: &Arc<Self>, handle: &AssetHandle) -> Result<()> {
        let asset = Arc::clone(handle.asset());
        if asset.is_virtual() {
            return Err(AssetError::InvalidState("virtual assets cannot be reloaded".into()));
        }
        info!(id = %asset.id(), "reloading asset");
        let dependencies = self.teardown(&asset, true);
        self.assets
            .lock()
            .entry(asset.id())
            .or_insert_with(|| Arc::clone(&asset));
        self.release_dependencies(asset.id(), dependencies);
        self.enqueue_load(asset);
        Ok(())
    }

    /// Unload every asset regardless of outstanding handles
    pub fn unload_all(&self) -> usize {
        let assets: Vec<Arc<Asset>> = self.assets.lock().values().cloned().collect();
        for asset in &assets {
            drop(self.teardown(asset, false));
        }
        self.assets.lock().clear();
        self.graph.lock().clear();
        self.stats.lock().unloads += assets.len() as u64;
        assets.len()
    }

    pub fn loaded_count(&self) -> usize {
        self.assets
            .lock()
            .values()
            .filter(|asset| asset.is_loaded())
            .count()
    }

    pub fn len(&self) -> usize {
        self.assets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.lock().is_empty()
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats.lock().clone()
    }

    /// Block until no load job or streaming task is pending
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        {
            let mut pending = self.pending.lock();
            while *pending > 0 {
                if self.idle.wait_until(&mut pending, deadline).timed_out() && *pending > 0 {
                    return false;
                }
            }
        }
        self.engine
            .wait_idle(deadline.saturating_duration_since(Instant::now()))
    }

    fn unload_asset(&self, asset: &Arc<Asset>) {
        let dependencies = self.teardown(asset, false);
        {
            let mut assets = self.assets.lock();
            if assets
                .get(&asset.id())
                .is_some_and(|current| Arc::ptr_eq(current, asset))
            {
                assets.remove(&asset.id());
            }
        }
        self.stats.lock().unloads += 1;
        self.release_dependencies(asset.id(), dependencies);
    }

    /// Whether some handle keeps a parent of `id` alive
    fn is_held(&self, id: AssetId) -> bool {
        let holders = self.graph.lock().holders(id);
        if holders.is_empty() {
            return false;
        }
        let assets = self.assets.lock();
        holders
            .iter()
            .filter_map(|holder| assets.get(holder))
            .any(|holder| holder.external_refs() > 0)
    }

    /// Dependencies nobody else references are unloaded with their parent
    fn release_dependencies(&self, parent: AssetId, dependencies: Vec<Arc<Asset>>) {
        {
            let mut graph = self.graph.lock();
            for dependency in &dependencies {
                graph.unlink(parent, dependency.id());
            }
        }
        for dependency in dependencies {
            let tracked = self
                .assets
                .lock()
                .get(&dependency.id())
                .is_some_and(|current| Arc::ptr_eq(current, &dependency));
            if tracked && dependency.external_refs() == 0 && !self.is_held(dependency.id()) {
                self.unload_asset(&dependency);
            }
        }
    }

    /// Bring the asset back to `Unloaded`, releasing every backend slot.
    /// With `requeue` a load is marked pending before waiters wake.
    fn teardown(&self, asset: &Arc<Asset>, requeue: bool) -> Vec<Arc<Asset>> {
        let span = info_span!("asset_unload", id = %asset.id());
        let _enter = span.enter();

        {
            let mut inner = asset.lock_inner();
            inner.load_queued = false;
            if inner.state != LoadState::Unloaded {
                inner.state = LoadState::Unloading;
            }
        }
        self.engine.cancel_streaming_tasks(asset);
        self.engine.unregister(asset);

        let dependencies = {
            let mut guard = asset.lock_inner();
            let inner: &mut AssetInner = &mut guard;
            let mut released = 0;
            if let Some(mut state) = inner.streaming.take() {
                released = state.release_all();
            }
            asset.kind().unload(&mut inner.payload);
            inner.storage = None;
            inner.header = None;
            inner.error = None;
            inner.state = LoadState::Unloaded;
            inner.load_queued = requeue;
            debug!(released, "asset unloaded");
            std::mem::take(&mut inner.dependencies)
        };
        asset.notify_state_changed();
        dependencies
    }

    fn enqueue_load(self: &Arc<Self>, asset: Arc<Asset>) {
        *self.pending.lock() += 1;
        self.stats.lock().loads_started += 1;
        let manager = Arc::clone(self);
        self.executor.spawn(Box::new(move || {
            manager.run_load(&asset);
            manager.load_done();
        }));
    }

    fn load_done(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn run_load(self: &Arc<Self>, asset: &Arc<Asset>) {
        let span = info_span!("asset_load", id = %asset.id(), type_name = %asset.type_name());
        let _enter = span.enter();

        let dependencies = {
            let mut guard = asset.lock_inner();
            if !guard.load_queued || guard.state != LoadState::Unloaded {
                debug!("load cancelled before start");
                return;
            }
            guard.load_queued = false;

            let inner: &mut AssetInner = &mut guard;
            match self.load_locked(asset, inner) {
                Ok((outcome, dependencies)) => {
                    inner.state = LoadState::Loaded;
                    if outcome == LoadOutcome::Streamable {
                        self.engine.register(asset);
                    } else if let Some(storage) = &inner.storage {
                        storage.close_file_handles();
                    }
                    self.stats.lock().loads_succeeded += 1;
                    info!(?outcome, "asset loaded");
                    dependencies
                }
                Err(err) => {
                    error!(error = %err, "asset load failed");
                    if let Some(mut state) = inner.streaming.take() {
                        state.release_all();
                    }
                    inner.payload = Default::default();
                    inner.state = LoadState::LoadFailed;
                    inner.error = Some(err);
                    self.stats.lock().loads_failed += 1;
                    Vec::new()
                }
            }
        };
        asset.notify_state_changed();

        if !dependencies.is_empty() {
            self.request_dependencies(asset, dependencies);
        }
    }

    fn load_locked(
        &self,
        asset: &Asset,
        inner: &mut AssetInner,
    ) -> Result<(LoadOutcome, Vec<AssetId>)> {
        let path = asset
            .path()
            .ok_or_else(|| AssetError::InvalidState("asset has no container path".into()))?;
        let storage = Storage::open(path)?;
        let header = storage.header();
        if header.id != asset.id() {
            return Err(AssetError::BadFormat(format!(
                "container holds {} instead of {}",
                header.id,
                asset.id()
            )));
        }
        if header.type_name != *asset.type_name() {
            return Err(AssetError::BadFormat(format!(
                "container holds a {} instead of a {}",
                header.type_name,
                asset.type_name()
            )));
        }
        inner.storage = Some(Arc::clone(&storage));
        inner.header = Some(Arc::clone(&header));
        inner.state = LoadState::HeaderLoaded;

        let factory = self.registry.get(asset.type_name().as_str())?;
        if let Some(report) = run_upgrade(&storage, factory.as_ref(), &self.options)? {
            debug!(from = report.from, to = report.to, written = report.written, "container upgraded");
            self.stats.lock().upgrades += 1;
        }
        let header = storage.header();
        inner.header = Some(Arc::clone(&header));

        inner.payload = asset.kind().init(&header)?;
        inner.state = LoadState::Loading;
        let mut ctx = LoadContext {
            id: asset.id(),
            header: &header,
            storage: Some(&storage),
            payload: &mut inner.payload,
            streaming: &mut inner.streaming,
            backends: self.engine.backends(),
        };
        let outcome = asset.kind().load(&mut ctx)?;
        Ok((outcome, header.dependencies.clone()))
    }

    fn request_dependencies(self: &Arc<Self>, asset: &Arc<Asset>, ids: Vec<AssetId>) {
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            if id == asset.id() {
                continue;
            }
            match self.get_or_load(id) {
                Ok(handle) => handles.push(handle),
                Err(err) => warn!(dependency = %id, error = %err, "skipping dependency"),
            }
        }
        let dependencies: Vec<Arc<Asset>> = handles.iter().map(|h| Arc::clone(h.asset())).collect();
        let stored = {
            let mut inner = asset.lock_inner();
            if inner.state == LoadState::Loaded {
                let mut graph = self.graph.lock();
                for dependency in &dependencies {
                    graph.link(asset.id(), dependency.id());
                }
                inner.dependencies = dependencies.clone();
                true
            } else {
                false
            }
        };
        drop(handles);
        if !stored {
            debug!(id = %asset.id(), "parent unloaded before its dependencies were linked");
            self.release_dependencies(asset.id(), dependencies);
        }
    }
}

impl std::fmt::Debug for AssetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetManager")
            .field("registry", &self.registry)
            .field("indexed", &self.index.len())
            .field("assets", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::json::{JsonHeader, JSON_DATA_TYPE_NAME};
    use crate::backend::Backends;
    use crate::container::ContainerData;
    use crate::executor::InlineExecutor;
    use crate::streaming::UsageTracker;

    fn manager() -> Arc<AssetManager> {
        let executor: Arc<dyn TaskExecutor> = Arc::new(InlineExecutor);
        let engine = StreamingEngine::new(
            Arc::clone(&executor),
            Backends::headless(),
            Arc::new(UsageTracker::new()),
        );
        AssetManager::new(FactoryRegistry::builtin(), engine, executor, &AssetConfig::default())
    }

    fn json_container(dir: &Path, name: &str, doc: &str) -> (AssetId, PathBuf) {
        let id = AssetId::generate();
        let path = dir.join(format!("{name}.sbac"));
        ContainerData::new(id, JSON_DATA_TYPE_NAME, 1)
            .with_custom_data(JsonHeader::new("test").to_bytes().unwrap())
            .with_chunk(0, doc.as_bytes().to_vec())
            .save(&path)
            .unwrap();
        (id, path)
    }

    #[test]
    fn test_mount_indexes_containers() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        let (a, _) = json_container(dir.path(), "a", "1");
        let (b, _) = json_container(&nested, "b", "2");
        std::fs::write(dir.path().join("junk.sbac"), b"nope").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let index = ContentIndex::new();
        assert_eq!(index.mount(dir.path()).unwrap(), 2);
        assert!(index.lookup(a).is_some());
        assert_eq!(index.lookup(b).unwrap().type_name.as_str(), JSON_DATA_TYPE_NAME);
    }

    #[test]
    fn test_get_or_load_returns_same_asset() {
        let dir = tempfile::tempdir().unwrap();
        let (id, path) = json_container(dir.path(), "doc", r#"{"hp": 10}"#);
        let manager = manager();
        let first = manager.get_or_load_path(&path).unwrap();
        let second = manager.get_or_load(id).unwrap();
        assert!(first.ptr_eq(&second));
        manager.wait_for_loaded(&first).unwrap();
        assert_eq!(first.json_value().unwrap()["hp"], 10);
        assert_eq!(manager.stats().loads_started, 1);
    }

    #[test]
    fn test_unknown_id_not_found() {
        let manager = manager();
        let id = AssetId::generate();
        assert_eq!(manager.get_or_load(id).unwrap_err(), AssetError::NotFound(id));
    }

    #[test]
    fn test_unload_respects_handles() {
        let dir = tempfile::tempdir().unwrap();
        let (id, _) = json_container(dir.path(), "doc", "[]");
        let manager = manager();
        manager.mount(dir.path()).unwrap();
        let a = manager.get_or_load(id).unwrap();
        let b = a.clone();
        let asset = Arc::clone(a.asset());

        assert!(!manager.unload(a).unwrap());
        assert!(asset.is_loaded());
        assert!(manager.unload(b).unwrap());
        assert_eq!(asset.state(), LoadState::Unloaded);
        assert!(manager.get(id).is_none());
    }

    fn linked_json(dir: &Path, name: &str, id: AssetId, dependencies: &[AssetId]) {
        let mut data = ContainerData::new(id, JSON_DATA_TYPE_NAME, 1)
            .with_custom_data(JsonHeader::new("test").to_bytes().unwrap())
            .with_chunk(0, b"{}".to_vec());
        for &dependency in dependencies {
            data = data.with_dependency(dependency);
        }
        data.save(dir.join(format!("{name}.sbac"))).unwrap();
    }

    #[test]
    fn test_cyclic_dependencies_unload_together() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (AssetId::generate(), AssetId::generate());
        linked_json(dir.path(), "a", a, &[b]);
        linked_json(dir.path(), "b", b, &[a]);
        let manager = manager();
        manager.mount(dir.path()).unwrap();

        let handle = manager.get_or_load(a).unwrap();
        manager.wait_for_loaded(&handle).unwrap();
        assert_eq!(manager.len(), 2);
        assert!(manager.get(b).unwrap().is_loaded());

        assert!(manager.unload(handle).unwrap());
        assert!(manager.is_empty());
        assert_eq!(manager.stats().unloads, 2);
    }

    #[test]
    fn test_dependency_stays_while_parent_referenced() {
        let dir = tempfile::tempdir().unwrap();
        let (parent, child) = (AssetId::generate(), AssetId::generate());
        linked_json(dir.path(), "parent", parent, &[child]);
        linked_json(dir.path(), "child", child, &[]);
        let manager = manager();
        manager.mount(dir.path()).unwrap();

        let parent = manager.get_or_load(parent).unwrap();
        let child_handle = manager.get(child).unwrap();
        assert!(!manager.unload(child_handle).unwrap());
        assert!(manager.get(child).unwrap().is_loaded());

        assert!(manager.unload(parent).unwrap());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_dependencies_released_when_parent_unloads_mid_load() {
        let dir = tempfile::tempdir().unwrap();
        let (parent, child) = (AssetId::generate(), AssetId::generate());
        linked_json(dir.path(), "child", child, &[]);
        linked_json(dir.path(), "parent", parent, &[child]);
        let manager = manager();
        manager.mount(dir.path()).unwrap();

        // Parent was torn down before its dependency list was linked
        let shell = Arc::clone(manager.get_or_load(parent).unwrap().asset());
        manager.unload_all();
        manager.request_dependencies(&shell, vec![child]);
        assert!(manager.is_empty());
        assert!(manager.graph.lock().dependents.is_empty());
    }

    #[test]
    fn test_virtual_asset() {
        let manager = manager();
        let handle = manager.create_virtual(JSON_DATA_TYPE_NAME).unwrap();
        assert!(handle.is_virtual());
        assert!(handle.is_loaded());
        assert_eq!(handle.json_value(), Some(serde_json::Value::Null));
        assert!(matches!(
            manager.create_virtual("Texture"),
            Err(AssetError::InvalidState(_))
        ));
    }

    #[test]
    fn test_bad_document_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let (_, path) = json_container(dir.path(), "doc", "{not json");
        let manager = manager();
        let handle = manager.get_or_load_path(&path).unwrap();
        assert!(matches!(
            manager.wait_for_loaded(&handle),
            Err(AssetError::Decode(_))
        ));
        assert_eq!(handle.state(), LoadState::LoadFailed);
        assert_eq!(manager.stats().loads_failed, 1);
    }
}
