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

//! Serialized version migration
//!
//! An `Upgrader` is an ordered chain of single-step migrations. Each step
//! reads the previous container and writes a fresh one; chunks the step
//! does not copy or set are dropped.

mod driver;

pub use driver::{run_upgrade, UpgradeOptions, UpgradeReport};

use crate::container::{ContainerData, MAX_CHUNKS};
use crate::error::{AssetError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info_span};

pub type MigrationFn = fn(&mut MigrationContext<'_>) -> Result<()>;

/// One `from -> to` step
#[derive(Clone, Copy)]
pub struct Migration {
    pub from: u32,
    pub to: u32,
    pub name: &'static str,
    apply: MigrationFn,
}

impl Migration {
    pub const fn new(from: u32, to: u32, name: &'static str, apply: MigrationFn) -> Self {
        Self {
            from,
            to,
            name,
            apply,
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Migration({} {} -> {})", self.name, self.from, self.to)
    }
}

/// Input and output of one migration step
///
/// Id, type name, metadata, dependencies and custom data are already copied
/// into the output; chunks are not.
pub struct MigrationContext<'a> {
    input: &'a ContainerData,
    output: &'a mut ContainerData,
}

impl<'a> MigrationContext<'a> {
    pub fn new(input: &'a ContainerData, output: &'a mut ContainerData) -> Self {
        Self { input, output }
    }

    pub fn input(&self) -> &ContainerData {
        self.input
    }

    pub fn output(&self) -> &ContainerData {
        self.output
    }

    pub fn input_custom_data(&self) -> &[u8] {
        &self.input.custom_data
    }

    pub fn set_custom_data(&mut self, data: Vec<u8>) {
        self.output.custom_data = data;
    }

    /// Copy input chunk `src` to output chunk `dst`, flags included
    pub fn copy_chunk(&mut self, src: usize, dst: usize) -> Result<()> {
        let data = self
            .input
            .chunk_data_at(src)
            .cloned()
            .ok_or_else(|| AssetError::chunk_missing(src, "input chunk absent"))?;
        self.output.set_chunk_data(dst, Some(data))
    }

    /// Copy every present input chunk to the same index
    pub fn copy_chunks(&mut self) {
        for index in 0..MAX_CHUNKS {
            if let Some(data) = self.input.chunk_data_at(index) {
                self.output.chunks[index] = Some(data.clone());
            }
        }
    }

    pub fn set_chunk(&mut self, index: usize, bytes: impl Into<Arc<[u8]>>) -> Result<()> {
        self.output.set_chunk(index, bytes)
    }
}

/// Ordered migration chain of one asset type
#[derive(Clone, Debug, Default)]
pub struct Upgrader {
    migrations: Vec<Migration>,
}

impl Upgrader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, migration: Migration) -> Self {
        self.add(migration);
        self
    }

    pub fn add(&mut self, migration: Migration) {
        self.migrations.push(migration);
        self.migrations.sort_by_key(|m| m.from);
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn step_from(&self, version: u32) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.from == version)
    }

    /// Run the chain until `input` is at `current`
    pub fn upgrade(&self, input: ContainerData, current: u32) -> Result<ContainerData> {
        let found = input.serialized_version;
        if found > current {
            return Err(AssetError::UnsupportedVersion { found, current });
        }

        let span = info_span!("upgrade", id = %input.id, type_name = %input.type_name);
        let _enter = span.enter();

        let mut input = input;
        while input.serialized_version < current {
            let version = input.serialized_version;
            let step = self
                .step_from(version)
                .ok_or(AssetError::UnsupportedVersion {
                    found: version,
                    current,
                })?;
            if step.to <= step.from || step.to > current {
                return Err(AssetError::UpgradeFailed(format!(
                    "{step:?} does not move towards version {current}"
                )));
            }

            let mut output =
                ContainerData::new(input.id, input.type_name.clone(), step.to)
                    .with_custom_data(input.custom_data.clone());
            output.metadata = input.metadata.clone();
            output.dependencies = input.dependencies.clone();

            let mut ctx = MigrationContext::new(&input, &mut output);
            (step.apply)(&mut ctx).map_err(|err| {
                AssetError::UpgradeFailed(format!("{} ({} -> {}): {err}", step.name, step.from, step.to))
            })?;
            debug!(step = step.name, from = step.from, to = step.to, "migration applied");
            input = output;
        }
        Ok(input)
    }
}
