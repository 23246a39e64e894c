//! Observed unit state persistence.
//!
//! States are written to two places with identical payloads: the legacy
//! single-writer key `state/<name>` and the per-machine key
//! `states/<name>/<machine>`. Older readers follow the legacy key; removal
//! always covers both.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use flotilla_types::{MachineState, UnitHash, UnitState};

use super::{Registry, RegistryError};
use crate::kv::{DeleteOptions, SetOptions};

/// Wire form of a persisted unit state. The unit name is carried by the
/// key path, not the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UnitStateModel {
    #[serde(default)]
    load_state: String,

    #[serde(default)]
    active_state: String,

    #[serde(default)]
    sub_state: String,

    /// Absent when the record carries no machine identity.
    #[serde(default)]
    machine_state: Option<MachineState>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    unit_hash: String,
}

/// Sort key for unit state listings: name first, machine id second.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MusKey {
    pub name: String,
    pub machine_id: String,
}

/// A state without a unit hash is invalid and maps to nothing.
pub(crate) fn unit_state_to_model(state: &UnitState) -> Option<UnitStateModel> {
    if state.unit_hash.is_empty() {
        return None;
    }
    let machine_state = if state.machine_id.is_empty() {
        None
    } else {
        Some(MachineState::new(state.machine_id.clone()))
    };
    Some(UnitStateModel {
        load_state: state.load_state.clone(),
        active_state: state.active_state.clone(),
        sub_state: state.sub_state.clone(),
        machine_state,
        unit_hash: state.unit_hash.as_str().to_string(),
    })
}

pub(crate) fn model_to_unit_state(model: &UnitStateModel, name: &str) -> UnitState {
    UnitState {
        unit_name: name.to_string(),
        load_state: model.load_state.clone(),
        active_state: model.active_state.clone(),
        sub_state: model.sub_state.clone(),
        machine_id: model
            .machine_state
            .as_ref()
            .map(|m| m.id.clone())
            .unwrap_or_default(),
        unit_hash: UnitHash::from_hex(model.unit_hash.clone()),
    }
}

impl Registry {
    /// Persist the observed state of `name`.
    ///
    /// A missing state or one without a unit hash is invalid and produces
    /// zero writes. Otherwise the legacy and per-machine keys are written
    /// with the identical payload under the given TTL.
    pub async fn save_unit_state(
        &self,
        name: &str,
        state: Option<&UnitState>,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        let Some(state) = state else {
            warn!(unit = %name, "skipped saving empty unit state");
            return Ok(());
        };
        let Some(model) = unit_state_to_model(state) else {
            warn!(unit = %name, "skipped saving unit state without hash");
            return Ok(());
        };

        let legacy_key = self.legacy_unit_state_path(name);
        let value = serde_json::to_string(&model).map_err(|source| RegistryError::Codec {
            key: legacy_key.clone(),
            source,
        })?;
        let opts = SetOptions::default().with_ttl(ttl);

        self.kv().set(&legacy_key, &value, opts.clone()).await?;
        self.kv()
            .set(
                &self.unit_state_path(&state.machine_id, name),
                &value,
                opts,
            )
            .await?;
        Ok(())
    }

    /// Delete every stored state for `name`: the legacy key, then the
    /// per-machine subtree. Missing keys are success; anything else
    /// propagates immediately.
    pub async fn remove_unit_state(&self, name: &str) -> Result<(), RegistryError> {
        match self
            .kv()
            .delete(&self.legacy_unit_state_path(name), DeleteOptions::default())
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        match self
            .kv()
            .delete(
                &self.unit_states_path_for(name),
                DeleteOptions {
                    recursive: true,
                    ..Default::default()
                },
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Observed state of `name` on one machine. Missing is `None`; decode
    /// and transport failures are errors.
    pub async fn unit_state(
        &self,
        name: &str,
        machine_id: &str,
    ) -> Result<Option<UnitState>, RegistryError> {
        let key = self.unit_state_path(machine_id, name);
        match self.kv().get(&key).await {
            Ok(pair) => {
                let model: UnitStateModel = serde_json::from_str(&pair.value)
                    .map_err(|source| RegistryError::Codec { key, source })?;
                Ok(Some(model_to_unit_state(&model, name)))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every observed unit state, sorted by (name, machine id).
    ///
    /// Garbage records are skipped with a warning; the ordering never
    /// depends on store iteration order.
    pub async fn unit_states(&self) -> Result<Vec<UnitState>, RegistryError> {
        let prefix = self.unit_states_prefix();
        let pairs = Self::absent_as_empty(self.kv().list(&prefix).await)?;

        let mut states: BTreeMap<MusKey, UnitState> = BTreeMap::new();
        for pair in pairs {
            let rel = pair
                .key
                .strip_prefix(&prefix)
                .unwrap_or(&pair.key)
                .trim_start_matches('/');
            let Some((name, machine_id)) = rel.split_once('/') else {
                warn!(key = %pair.key, "unexpected unit state key shape");
                continue;
            };
            let model: UnitStateModel = match serde_json::from_str(&pair.value) {
                Ok(model) => model,
                Err(error) => {
                    warn!(key = %pair.key, %error, "skipping undecodable unit state");
                    continue;
                }
            };
            states.insert(
                MusKey {
                    name: name.to_string(),
                    machine_id: machine_id.to_string(),
                },
                model_to_unit_state(&model, name),
            );
        }
        Ok(states.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use flotilla_types::UnitHash;

    use super::super::testutil::{Action, RecordingKv, Scripted};
    use super::super::{Registry, RegistryError};
    use super::*;
    use crate::kv::{KvError, KvPair};

    fn state(machine_id: &str, hash: &str) -> UnitState {
        UnitState::new(
            "foo.service",
            "loaded",
            "active",
            "running",
            machine_id,
            UnitHash::from_hex(hash),
        )
    }

    fn registry(kv: Arc<RecordingKv>) -> Registry {
        Registry::new(kv, "/flotilla/")
    }

    #[test]
    fn test_unit_state_paths() {
        let r = registry(Arc::new(RecordingKv::default()));
        assert_eq!(
            r.legacy_unit_state_path("foo.service"),
            "/flotilla/state/foo.service"
        );
        assert_eq!(
            r.unit_state_path("mach1", "foo.service"),
            "/flotilla/states/foo.service/mach1"
        );
    }

    #[tokio::test]
    async fn test_save_unit_state_none_is_a_noop() {
        let kv = Arc::new(RecordingKv::default());
        registry(kv.clone())
            .save_unit_state("foo.service", None, Duration::from_secs(2))
            .await
            .unwrap();

        assert!(kv.sets.lock().unwrap().is_empty());
        assert!(kv.deletes.lock().unwrap().is_empty());
        assert!(kv.gets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_unit_state_without_hash_is_a_noop() {
        let kv = Arc::new(RecordingKv::default());
        registry(kv.clone())
            .save_unit_state(
                "foo.service",
                Some(&state("mach1", "")),
                Duration::from_secs(2),
            )
            .await
            .unwrap();

        assert!(kv.sets.lock().unwrap().is_empty());
        assert!(kv.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_unit_state_writes_both_layouts() {
        let kv = Arc::new(RecordingKv::default());
        registry(kv.clone())
            .save_unit_state(
                "foo.service",
                Some(&state("mach1", "quickbrownfox")),
                Duration::from_secs(2),
            )
            .await
            .unwrap();

        let sets = kv.sets.lock().unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].key, "/flotilla/state/foo.service");
        assert_eq!(sets[1].key, "/flotilla/states/foo.service/mach1");
        // Identical payload in both places.
        assert_eq!(sets[0].value, sets[1].value);
        assert!(sets[0].value.contains(r#""unitHash":"quickbrownfox""#));

        assert!(kv.gets.lock().unwrap().is_empty());
        assert!(kv.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unit_state_deletes_both_layouts() {
        let kv = Arc::new(RecordingKv::default());
        registry(kv.clone())
            .remove_unit_state("foo.service")
            .await
            .unwrap();

        let deletes = kv.deletes.lock().unwrap();
        assert_eq!(
            *deletes,
            vec![
                Action::key("/flotilla/state/foo.service"),
                Action::recursive("/flotilla/states/foo.service"),
            ]
        );
        assert!(kv.sets.lock().unwrap().is_empty());
        assert!(kv.gets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unit_state_error_handling() {
        let not_found = || Scripted::Fail(KvError::NotFound("x".to_string()));
        let unavailable = || Scripted::Fail(KvError::Unavailable("registry on fire".to_string()));
        let ok = || Scripted::Pairs(vec![]);

        let cases: Vec<(Vec<Scripted>, bool)> = vec![
            (vec![not_found()], false),
            (vec![ok(), not_found()], false),
            (vec![ok(), ok()], false),
            (vec![unavailable()], true),
            (vec![ok(), unavailable()], true),
        ];

        for (i, (script, want_err)) in cases.into_iter().enumerate() {
            let kv = Arc::new(RecordingKv::scripted(script));
            let result = registry(kv).remove_unit_state("foo.service").await;
            assert_eq!(result.is_err(), want_err, "case {i}");
        }
    }

    #[test]
    fn test_unit_state_to_model() {
        // No hash: invalid regardless of machine identity.
        assert!(unit_state_to_model(&state("", "")).is_none());
        assert!(unit_state_to_model(&state("mach1", "")).is_none());

        // Hash without machine identity is fine.
        let model = unit_state_to_model(&state("", "heh")).unwrap();
        assert!(model.machine_state.is_none());
        assert_eq!(model.unit_hash, "heh");

        let model = unit_state_to_model(&state("mach1", "miaow")).unwrap();
        assert_eq!(model.machine_state.unwrap().id, "mach1");
    }

    #[test]
    fn test_model_round_trip_preserves_state() {
        let original = state("mach1", "quickbrownfox");
        let model = unit_state_to_model(&original).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let decoded: UnitStateModel = serde_json::from_str(&json).unwrap();
        // The unit name travels in the key path, not the payload.
        assert_eq!(model_to_unit_state(&decoded, "foo.service"), original);
    }

    #[tokio::test]
    async fn test_get_unit_state_decoding() {
        // Missing hash and machine state are both valid on read.
        let payload = r#"{"loadState":"abc","activeState":"def","subState":"ghi"}"#;
        let kv = Arc::new(RecordingKv::scripted(vec![Scripted::Pairs(vec![KvPair {
            key: "/flotilla/states/foo.service/mach1".to_string(),
            value: payload.to_string(),
        }])]));
        let us = registry(kv.clone())
            .unit_state("foo.service", "mach1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(us.load_state, "abc");
        assert_eq!(us.machine_id, "");
        assert!(us.unit_hash.is_empty());
        assert_eq!(
            *kv.gets.lock().unwrap(),
            vec![Action::key("/flotilla/states/foo.service/mach1")]
        );

        // Missing key reads as None.
        let kv = Arc::new(RecordingKv::default());
        assert!(registry(kv)
            .unit_state("foo.service", "mach1")
            .await
            .unwrap()
            .is_none());

        // Garbage is an error, not a silent miss.
        let kv = Arc::new(RecordingKv::scripted(vec![Scripted::Pairs(vec![KvPair {
            key: "/flotilla/states/foo.service/mach1".to_string(),
            value: "garbage, not good proper json".to_string(),
        }])]));
        let err = registry(kv)
            .unit_state("foo.service", "mach1")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Codec { .. }));

        // Transport errors propagate.
        let kv = Arc::new(RecordingKv::scripted(vec![Scripted::Fail(
            KvError::Unavailable("timeout".to_string()),
        )]));
        assert!(registry(kv)
            .unit_state("foo.service", "mach1")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unit_states_sorted_and_garbage_skipped() {
        let payload = |hash: &str, machine: &str| {
            serde_json::to_string(&unit_state_to_model(&state(machine, hash)).unwrap()).unwrap()
        };
        let kv = Arc::new(RecordingKv::scripted(vec![Scripted::Pairs(vec![
            KvPair {
                key: "/flotilla/states/foo/mach2".to_string(),
                value: payload("xxx", "mach2"),
            },
            KvPair {
                key: "/flotilla/states/foo/mach1".to_string(),
                value: payload("zzz", "mach1"),
            },
            KvPair {
                key: "/flotilla/states/bar/zzz".to_string(),
                value: "total garbage".to_string(),
            },
        ])]));

        let states = registry(kv).unit_states().await.unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].machine_id, "mach1");
        assert_eq!(states[0].unit_hash.as_str(), "zzz");
        assert_eq!(states[1].machine_id, "mach2");
    }

    #[tokio::test]
    async fn test_unit_states_error_handling() {
        // Missing subtree is an empty listing.
        let kv = Arc::new(RecordingKv::default());
        assert!(registry(kv).unit_states().await.unwrap().is_empty());

        // Store failure propagates.
        let kv = Arc::new(RecordingKv::scripted(vec![Scripted::Fail(
            KvError::Unavailable("registry on fire".to_string()),
        )]));
        assert!(registry(kv).unit_states().await.is_err());
    }

    #[test]
    fn test_mus_key_ordering() {
        let mut keys = vec![
            MusKey {
                name: "def".into(),
                machine_id: "bbb".into(),
            },
            MusKey {
                name: "ppp".into(),
                machine_id: "zzz".into(),
            },
            MusKey {
                name: "xxx".into(),
                machine_id: "aaa".into(),
            },
            MusKey {
                name: "abc".into(),
                machine_id: "zzz".into(),
            },
            MusKey {
                name: "abc".into(),
                machine_id: "aaa".into(),
            },
        ];
        keys.sort();
        let flat: Vec<(String, String)> = keys
            .into_iter()
            .map(|k| (k.name, k.machine_id))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("abc".to_string(), "aaa".to_string()),
                ("abc".to_string(), "zzz".to_string()),
                ("def".to_string(), "bbb".to_string()),
                ("ppp".to_string(), "zzz".to_string()),
                ("xxx".to_string(), "aaa".to_string()),
            ]
        );
    }
}
