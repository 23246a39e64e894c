//! Content-addressed unit file storage.

use serde::{Deserialize, Serialize};

use flotilla_types::{UnitFile, UnitHash};

use super::{Registry, RegistryError};
use crate::kv::SetOptions;

/// Wire form of a stored unit file.
#[derive(Debug, Serialize, Deserialize)]
struct UnitFileModel {
    raw: String,
}

impl Registry {
    /// Store a unit file under its content address.
    ///
    /// Unit files are immutable: a colliding write means the identical
    /// content is already stored, which is success.
    pub async fn create_unit(&self, unit: &UnitFile) -> Result<(), RegistryError> {
        let key = self.unit_path(unit.hash().as_str());
        let model = UnitFileModel {
            raw: unit.raw().to_string(),
        };
        let value = serde_json::to_string(&model).map_err(|source| RegistryError::Codec {
            key: key.clone(),
            source,
        })?;

        match self.kv().set(&key, &value, SetOptions::create_only()).await {
            Ok(()) => Ok(()),
            Err(e) if matches!(e, crate::kv::KvError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a unit file by its content address.
    pub async fn unit(&self, hash: &UnitHash) -> Result<Option<UnitFile>, RegistryError> {
        let key = self.unit_path(hash.as_str());
        match self.kv().get(&key).await {
            Ok(pair) => {
                let model: UnitFileModel = serde_json::from_str(&pair.value)
                    .map_err(|source| RegistryError::Codec { key, source })?;
                Ok(Some(UnitFile::parse(&model.raw)))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
