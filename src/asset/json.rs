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

//! Structured data assets; the document lives in chunk 0

use super::{AssetKind, AssetPayload, LoadContext, LoadOutcome};
use crate::container::AssetHeader;
use crate::error::{AssetError, Result};
use serde_json::Value;
use speedy::{Readable, Writable};

pub const JSON_DATA_TYPE_NAME: &str = "JsonData";
pub const JSON_SERIALIZED_VERSION: u32 = 1;
pub const DEFAULT_SCHEMA: &str = "default";

#[derive(Clone, Debug, PartialEq, Eq, Readable, Writable)]
pub struct JsonHeader {
    pub schema: String,
}

impl JsonHeader {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.write_to_vec()?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::read_from_buffer(bytes)?;
        if Writable::<speedy::LittleEndian>::bytes_needed(&header)? != bytes.len() {
            return Err(AssetError::BadCustomData("trailing bytes after json header".into()));
        }
        Ok(header)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct JsonData {
    pub header: JsonHeader,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonKind;

impl AssetKind for JsonKind {
    fn type_name(&self) -> &'static str {
        JSON_DATA_TYPE_NAME
    }

    fn init(&self, header: &AssetHeader) -> Result<AssetPayload> {
        let header = JsonHeader::from_bytes(&header.custom_data)?;
        if header.schema.is_empty() {
            return Err(AssetError::BadCustomData("empty json schema name".into()));
        }
        Ok(AssetPayload::Json(JsonData {
            header,
            value: Value::Null,
        }))
    }

    fn init_virtual(&self) -> Result<Vec<u8>> {
        JsonHeader::new(DEFAULT_SCHEMA).to_bytes()
    }

    fn load(&self, ctx: &mut LoadContext<'_>) -> Result<LoadOutcome> {
        let value = match ctx.storage() {
            Some(storage) if storage.has_chunk(0) => serde_json::from_slice(&storage.load_chunk(0)?)?,
            _ => Value::Null,
        };
        if let Some(data) = ctx.payload_mut().as_json_mut() {
            data.value = value;
        }
        Ok(LoadOutcome::Resident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerData;
    use crate::id::AssetId;

    #[test]
    fn test_json_header_bytes() {
        let header = JsonHeader::new("items");
        let bytes = header.to_bytes().unwrap();
        assert_eq!(JsonHeader::from_bytes(&bytes).unwrap(), header);
        assert!(JsonHeader::from_bytes(&[1, 2]).is_err());
    }

    #[test]
    fn test_init_builds_empty_document() {
        let data = ContainerData::new(AssetId::generate(), JSON_DATA_TYPE_NAME, 1)
            .with_custom_data(JsonHeader::new("items").to_bytes().unwrap());
        let payload = JsonKind.init(&data.header().unwrap()).unwrap();
        assert_eq!(payload.as_json().unwrap().value, Value::Null);
        assert!(payload.streaming_profile().is_none());
    }

    #[test]
    fn test_virtual_header_parses() {
        let bytes = JsonKind.init_virtual().unwrap();
        assert_eq!(JsonHeader::from_bytes(&bytes).unwrap().schema, DEFAULT_SCHEMA);
    }
}
