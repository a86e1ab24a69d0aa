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

//! Error types

use crate::id::AssetId;
use thiserror::Error;

/// Coarse error category, stable across message changes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    BadFormat,
    ChunkMissing,
    UnknownType,
    UnsupportedVersion,
    UpgradeFailed,
    BadCustomData,
    Backend,
    Decode,
    Cancelled,
    NotFound,
    Config,
    InvalidState,
}

/// Asset system error type
///
/// Errors are `Clone` so a failed load can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssetError {
    /// Underlying file access failed
    #[error("IO error: {0}")]
    Io(String),

    /// Magic, version or size inconsistency in the container preamble
    #[error("Bad container format: {0}")]
    BadFormat(String),

    /// Chunk bytes requested but the descriptor is absent or the data is short
    #[error("Chunk {index} missing: {reason}")]
    ChunkMissing { index: usize, reason: String },

    /// No factory registered for the type name
    #[error("Unknown asset type: {0}")]
    UnknownType(String),

    /// Serialized version cannot be brought to the current version
    #[error("Unsupported serialized version {found} (current is {current})")]
    UnsupportedVersion { found: u32, current: u32 },

    /// A migration step returned failure
    #[error("Upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Type-specific header bytes failed to parse or validate
    #[error("Bad custom data: {0}")]
    BadCustomData(String),

    /// GPU/audio backend rejected a create, write or delete
    #[error("Backend error: {0}")]
    Backend(String),

    /// Chunk payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Operation was cancelled before completion
    #[error("Operation cancelled")]
    Cancelled,

    /// No container known for the asset id
    #[error("Asset not found: {0}")]
    NotFound(AssetId),

    /// Invalid loader configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Operation not valid in the asset's current state
    #[error("Invalid asset state: {0}")]
    InvalidState(String),
}

impl AssetError {
    /// Taxonomy bucket of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssetError::Io(_) => ErrorKind::Io,
            AssetError::BadFormat(_) => ErrorKind::BadFormat,
            AssetError::ChunkMissing { .. } => ErrorKind::ChunkMissing,
            AssetError::UnknownType(_) => ErrorKind::UnknownType,
            AssetError::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            AssetError::UpgradeFailed(_) => ErrorKind::UpgradeFailed,
            AssetError::BadCustomData(_) => ErrorKind::BadCustomData,
            AssetError::Backend(_) => ErrorKind::Backend,
            AssetError::Decode(_) => ErrorKind::Decode,
            AssetError::Cancelled => ErrorKind::Cancelled,
            AssetError::NotFound(_) => ErrorKind::NotFound,
            AssetError::Config(_) => ErrorKind::Config,
            AssetError::InvalidState(_) => ErrorKind::InvalidState,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AssetError::Cancelled)
    }

    pub(crate) fn chunk_missing(index: usize, reason: impl Into<String>) -> Self {
        AssetError::ChunkMissing {
            index,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for AssetError {
    fn from(err: std::io::Error) -> Self {
        AssetError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AssetError {
    fn from(err: serde_json::Error) -> Self {
        AssetError::Decode(err.to_string())
    }
}

impl From<speedy::Error> for AssetError {
    fn from(err: speedy::Error) -> Self {
        AssetError::BadCustomData(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AssetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(AssetError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            AssetError::chunk_missing(3, "absent").kind(),
            ErrorKind::ChunkMissing
        );
        assert_eq!(
            AssetError::UnsupportedVersion {
                found: 4,
                current: 2
            }
            .kind(),
            ErrorKind::UnsupportedVersion
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AssetError = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("gone"));
    }
}
