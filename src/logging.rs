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

//! # Logging
//!
//! Every lifecycle transition, upgrade step and streaming task is traced.
//! With the `profiling` feature, `init_logging` installs a console
//! subscriber filtered by `RUST_LOG` and `init_file_logging` writes JSON
//! lines through a non-blocking appender.
//!
//! ```ignore
//! let _guard = archetype_assets::logging::init_file_logging("assets.log")?;
//! ```
//!
//! Profile in release mode; use `RUST_LOG=archetype_assets=trace` to see
//! per-chunk streaming decisions.

use crate::error::{AssetError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

const DEFAULT_FILTER: &str = "archetype_assets=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Console subscriber; fails if a global subscriber is already set
pub fn init_logging() -> Result<()> {
    let subscriber = Registry::default().with(env_filter()).with(fmt::layer());
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AssetError::Config(e.to_string()))
}

/// JSON-lines subscriber writing to `path`. Keep the guard alive; dropping
/// it flushes and stops the writer thread.
pub fn init_file_logging(path: impl AsRef<Path>) -> Result<WorkerGuard> {
    let file = std::fs::File::create(path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let subscriber = Registry::default().with(env_filter()).with(
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false),
    );
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AssetError::Config(e.to_string()))?;
    Ok(guard)
}
