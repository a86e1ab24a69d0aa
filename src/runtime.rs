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

//! Process-level wiring of registry, backends, executor, manager and engine

use crate::audio_source::AudioSourceRegistry;
use crate::backend::Backends;
use crate::config::AssetConfig;
use crate::error::Result;
use crate::executor::{default_executor, TaskExecutor};
use crate::factory::FactoryRegistry;
use crate::id::AssetId;
use crate::manager::AssetManager;
use crate::streaming::{
    PlaybackResidencyPolicy, StreamingEngine, UpdateReport, UsageHint, UsageTracker,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AssetRuntime {
    config: AssetConfig,
    usage: Arc<UsageTracker>,
    engine: Arc<StreamingEngine>,
    manager: Arc<AssetManager>,
    sources: Arc<AudioSourceRegistry>,
    shut_down: AtomicBool,
}

impl AssetRuntime {
    /// Built-in asset types on a worker pool of `streaming_pool_size`
    pub fn init(config: AssetConfig, backends: Backends) -> Result<Self> {
        config.validate()?;
        let executor = default_executor(config.streaming_pool_size)?;
        Self::init_with(config, backends, FactoryRegistry::builtin(), executor)
    }

    pub fn init_with(
        config: AssetConfig,
        backends: Backends,
        registry: FactoryRegistry,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        let usage = Arc::new(UsageTracker::new());
        let engine = StreamingEngine::new(Arc::clone(&executor), backends, Arc::clone(&usage));
        engine.apply_budgets(&config.group_budgets);

        let sources = Arc::new(AudioSourceRegistry::new(
            PlaybackResidencyPolicy::default().lookahead,
        ));
        engine.add_listener(sources.clone());

        let manager = AssetManager::new(registry, Arc::clone(&engine), executor, &config);
        info!(
            workers = config.streaming_pool_size,
            file_upgrade = config.allow_file_upgrade,
            verification = ?config.verification,
            "asset runtime initialized"
        );
        Ok(Self {
            config,
            usage,
            engine,
            manager,
            sources,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &AssetConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<AssetManager> {
        &self.manager
    }

    pub fn engine(&self) -> &Arc<StreamingEngine> {
        &self.engine
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    pub fn sources(&self) -> &Arc<AudioSourceRegistry> {
        &self.sources
    }

    pub fn set_usage(&self, id: AssetId, hint: UsageHint) {
        self.usage.set(id, hint);
    }

    /// Publish audio play heads and run one streaming pass
    pub fn update(&self) -> UpdateReport {
        if self.shut_down.load(Ordering::SeqCst) {
            return UpdateReport::default();
        }
        self.sources.publish_usage(&self.usage);
        self.engine.update()
    }

    /// Cancel all streaming and unload every asset. Returns the number of
    /// assets unloaded; later calls do nothing.
    pub fn shutdown(&self) -> usize {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let unloaded = self.manager.unload_all();
        if !self.manager.wait_idle(SHUTDOWN_TIMEOUT) {
            warn!("background work still pending at shutdown");
        }
        info!(unloaded, "asset runtime shut down");
        unloaded
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AssetRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRuntime")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .field("engine", &self.engine)
            .finish()
    }
}
