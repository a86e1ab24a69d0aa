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

//! Upgrading a stored container in place

use crate::config::Verification;
use crate::container::{AssetHeader, ContainerData};
use crate::error::{AssetError, Result};
use crate::factory::AssetFactory;
use crate::storage::Storage;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, info_span, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpgradeOptions {
    /// Rewrite the file; otherwise only the storage is swapped in memory
    pub allow_file_upgrade: bool,
    pub verification: Verification,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            allow_file_upgrade: cfg!(debug_assertions),
            verification: Verification::Basic,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeReport {
    pub from: u32,
    pub to: u32,
    /// The container on disk was rewritten
    pub written: bool,
}

fn backup_path(path: &Path) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let mut backup = path.as_os_str().to_owned();
    backup.push(format!(".bak.{millis}"));
    PathBuf::from(backup)
}

fn verify(
    storage: &Storage,
    original: &AssetHeader,
    factory: &dyn AssetFactory,
    verification: Verification,
) -> Result<()> {
    if verification == Verification::Off {
        return Ok(());
    }
    let header = storage.header();
    let current = factory.current_serialized_version();
    if header.id != original.id {
        return Err(AssetError::UpgradeFailed(format!(
            "verification: id changed to {}",
            header.id
        )));
    }
    if header.type_name != original.type_name {
        return Err(AssetError::UpgradeFailed(format!(
            "verification: type changed to {}",
            header.type_name
        )));
    }
    if header.serialized_version != current {
        return Err(AssetError::UpgradeFailed(format!(
            "verification: version {} after upgrade, expected {current}",
            header.serialized_version
        )));
    }
    if verification == Verification::Strict {
        storage
            .load_all_chunks()
            .and_then(|()| factory.kind().init(&header))
            .map_err(|e| AssetError::UpgradeFailed(format!("verification: {e}")))?;
    }
    Ok(())
}

/// Bring `storage` to the factory's current serialized version.
///
/// Returns `None` when the container is already current. On failure the
/// original file is restored from its backup; the backup is only kept
/// when the restore itself fails.
pub fn run_upgrade(
    storage: &Storage,
    factory: &dyn AssetFactory,
    options: &UpgradeOptions,
) -> Result<Option<UpgradeReport>> {
    let original = storage.header();
    let found = original.serialized_version;
    let current = factory.current_serialized_version();
    if found == current {
        return Ok(None);
    }
    if found > current {
        return Err(AssetError::UnsupportedVersion { found, current });
    }
    let upgrader = factory
        .upgrader()
        .ok_or(AssetError::UnsupportedVersion { found, current })?;

    let span = info_span!("run_upgrade", id = %original.id, type_name = %original.type_name);
    let _enter = span.enter();
    info!(from = found, to = current, "upgrading container");

    let input = storage.to_container_data()?;
    let report = UpgradeReport {
        from: found,
        to: current,
        written: false,
    };

    let path = match storage.path() {
        Some(path) if options.allow_file_upgrade => path.to_path_buf(),
        _ => {
            let previous = input.clone();
            let output = upgrader.upgrade(input, current)?;
            storage.replace_contents(output)?;
            if let Err(err) = verify(storage, &original, factory, options.verification) {
                storage.replace_contents(previous)?;
                return Err(err);
            }
            info!("container upgraded in memory");
            return Ok(Some(report));
        }
    };

    let backup = backup_path(&path);
    fs::copy(&path, &backup)?;

    let attempt = upgrader
        .upgrade(input, current)
        .and_then(|output: ContainerData| output.save(&path))
        .and_then(|()| storage.reload())
        .and_then(|()| verify(storage, &original, factory, options.verification));

    match attempt {
        Ok(()) => {
            discard_backup(&backup);
            info!("container upgraded on disk");
            Ok(Some(UpgradeReport {
                written: true,
                ..report
            }))
        }
        Err(err) => {
            warn!(error = %err, "upgrade failed, restoring backup");
            let restored = fs::copy(&backup, &path)
                .map_err(AssetError::from)
                .and_then(|_| storage.reload());
            match restored {
                Ok(()) => {
                    discard_backup(&backup);
                }
                Err(restore_err) => error!(
                    backup = %backup.display(),
                    error = %restore_err,
                    "restore failed; backup kept for manual recovery"
                ),
            }
            Err(err)
        }
    }
}

/// Remove a backup that is no longer needed. Failure only costs disk space.
fn discard_backup(backup: &Path) -> bool {
    match fs::remove_file(backup) {
        Ok(()) => true,
        Err(err) => {
            warn!(backup = %backup.display(), error = %err, "failed to delete upgrade backup");
            false
        }
    }
}
