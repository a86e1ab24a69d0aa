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

//! Type name to factory mapping

use crate::asset::audio::AUDIO_SERIALIZED_VERSION;
use crate::asset::json::JSON_SERIALIZED_VERSION;
use crate::asset::texture::{texture_upgrader, TEXTURE_SERIALIZED_VERSION};
use crate::asset::{Asset, AssetKind, AudioClipKind, JsonKind, TextureKind};
use crate::error::{AssetError, Result};
use crate::id::{AssetId, TypeName};
use crate::upgrade::Upgrader;
use ahash::AHashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Constructs asset shells of one type
pub trait AssetFactory: Send + Sync {
    fn type_name(&self) -> &TypeName;

    fn current_serialized_version(&self) -> u32;

    fn supports_virtual(&self) -> bool;

    fn upgrader(&self) -> Option<&Upgrader>;

    fn kind(&self) -> Arc<dyn AssetKind>;

    /// Empty, `Unloaded` asset shell
    fn create(&self, id: AssetId, path: Option<PathBuf>) -> Arc<Asset> {
        Asset::new(id, self.type_name().clone(), self.kind(), path)
    }
}

/// Factory around an `AssetKind`
pub struct KindFactory {
    type_name: TypeName,
    version: u32,
    supports_virtual: bool,
    upgrader: Option<Upgrader>,
    kind: Arc<dyn AssetKind>,
}

impl KindFactory {
    pub fn new(kind: impl AssetKind, version: u32) -> Self {
        Self {
            type_name: TypeName::new(kind.type_name()),
            version,
            supports_virtual: false,
            upgrader: None,
            kind: Arc::new(kind),
        }
    }

    pub fn with_upgrader(mut self, upgrader: Upgrader) -> Self {
        self.upgrader = Some(upgrader);
        self
    }

    pub fn with_virtual(mut self, supports_virtual: bool) -> Self {
        self.supports_virtual = supports_virtual;
        self
    }
}

impl AssetFactory for KindFactory {
    fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    fn current_serialized_version(&self) -> u32 {
        self.version
    }

    fn supports_virtual(&self) -> bool {
        self.supports_virtual
    }

    fn upgrader(&self) -> Option<&Upgrader> {
        self.upgrader.as_ref()
    }

    fn kind(&self) -> Arc<dyn AssetKind> {
        Arc::clone(&self.kind)
    }
}

impl fmt::Debug for KindFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindFactory")
            .field("type_name", &self.type_name)
            .field("version", &self.version)
            .field("supports_virtual", &self.supports_virtual)
            .field("upgrader", &self.upgrader)
            .finish()
    }
}

#[derive(Default)]
pub struct FactoryRegistryBuilder {
    factories: AHashMap<TypeName, Arc<dyn AssetFactory>>,
}

impl FactoryRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations replace earlier ones of the same type name
    pub fn register(mut self, factory: impl AssetFactory + 'static) -> Self {
        self.factories
            .insert(factory.type_name().clone(), Arc::new(factory));
        self
    }

    pub fn register_shared(mut self, factory: Arc<dyn AssetFactory>) -> Self {
        self.factories.insert(factory.type_name().clone(), factory);
        self
    }

    pub fn with_builtin(self) -> Self {
        self.register(KindFactory::new(TextureKind, TEXTURE_SERIALIZED_VERSION).with_upgrader(texture_upgrader()))
            .register(KindFactory::new(AudioClipKind, AUDIO_SERIALIZED_VERSION))
            .register(KindFactory::new(JsonKind, JSON_SERIALIZED_VERSION).with_virtual(true))
    }

    pub fn build(self) -> FactoryRegistry {
        FactoryRegistry {
            factories: self.factories,
        }
    }
}

/// Immutable once built
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: AHashMap<TypeName, Arc<dyn AssetFactory>>,
}

impl FactoryRegistry {
    pub fn builder() -> FactoryRegistryBuilder {
        FactoryRegistryBuilder::new()
    }

    /// Registry with `Texture`, `AudioClip` and `JsonData`
    pub fn builtin() -> Self {
        Self::builder().with_builtin().build()
    }

    pub fn get(&self, type_name: &str) -> Result<&Arc<dyn AssetFactory>> {
        self.factories
            .get(type_name)
            .ok_or_else(|| AssetError::UnknownType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &TypeName> {
        self.factories.keys()
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.factories.keys().map(TypeName::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FactoryRegistry").field("types", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::LoadState;

    #[test]
    fn test_builtin_registry() {
        let registry = FactoryRegistry::builtin();
        assert_eq!(registry.len(), 3);
        let texture = registry.get("Texture").unwrap();
        assert_eq!(texture.current_serialized_version(), TEXTURE_SERIALIZED_VERSION);
        assert!(texture.upgrader().is_some());
        assert!(!texture.supports_virtual());
        assert!(registry.get("JsonData").unwrap().supports_virtual());
    }

    #[test]
    fn test_unknown_type() {
        let registry = FactoryRegistry::builtin();
        assert!(matches!(
            registry.get("Mesh"),
            Err(AssetError::UnknownType(name)) if name == "Mesh"
        ));
    }

    #[test]
    fn test_create_shell() {
        let registry = FactoryRegistry::builtin();
        let id = AssetId::generate();
        let asset = registry.get("AudioClip").unwrap().create(id, None);
        assert_eq!(asset.id(), id);
        assert_eq!(asset.type_name().as_str(), "AudioClip");
        assert_eq!(asset.state(), LoadState::Unloaded);
        assert!(asset.is_virtual());
    }
}
