//! Typed facade over the key-value store.
//!
//! All durable cluster state lives under a configurable key prefix:
//!
//! - `job/<name>/{object,target-state,target-machine}` — declared jobs
//! - `unit/<hash>` — content-addressed unit files
//! - `machines/<id>/object` — machine presence, written under a TTL lease
//! - `state/<name>` and `states/<name>/<machine>` — observed unit states
//! - `lease/engine` — the engine leadership lease

mod job;
mod lease;
mod machine;
mod unit;
mod unit_state;

pub use lease::EngineLease;
pub use unit_state::MusKey;

use std::sync::Arc;

use thiserror::Error;

use crate::kv::{KvClient, KvError};

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The store failed; the current pass should be abandoned and retried.
    #[error("store error: {0}")]
    Kv(#[from] KvError),

    /// A stored value could not be encoded or decoded.
    #[error("codec failure for {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Create-only job write hit an existing job.
    #[error("job already exists: {0}")]
    JobExists(String),
}

/// Facade for every read and write the engine and operators perform.
pub struct Registry {
    kv: Arc<dyn KvClient>,
    key_prefix: String,
}

impl Registry {
    /// Create a registry rooted at `key_prefix` (e.g. `/flotilla/`).
    pub fn new(kv: Arc<dyn KvClient>, key_prefix: &str) -> Self {
        let mut key_prefix = key_prefix.to_string();
        if !key_prefix.starts_with('/') {
            key_prefix.insert(0, '/');
        }
        if !key_prefix.ends_with('/') {
            key_prefix.push('/');
        }
        Self { kv, key_prefix }
    }

    pub(crate) fn kv(&self) -> &dyn KvClient {
        self.kv.as_ref()
    }

    // Key layout.

    fn job_prefix(&self) -> String {
        format!("{}job", self.key_prefix)
    }

    fn job_object_path(&self, name: &str) -> String {
        format!("{}job/{}/object", self.key_prefix, name)
    }

    fn job_target_state_path(&self, name: &str) -> String {
        format!("{}job/{}/target-state", self.key_prefix, name)
    }

    fn job_target_machine_path(&self, name: &str) -> String {
        format!("{}job/{}/target-machine", self.key_prefix, name)
    }

    fn job_path(&self, name: &str) -> String {
        format!("{}job/{}", self.key_prefix, name)
    }

    fn unit_path(&self, hash: &str) -> String {
        format!("{}unit/{}", self.key_prefix, hash)
    }

    fn machines_prefix(&self) -> String {
        format!("{}machines", self.key_prefix)
    }

    fn legacy_unit_state_path(&self, name: &str) -> String {
        format!("{}state/{}", self.key_prefix, name)
    }

    fn unit_state_path(&self, machine_id: &str, name: &str) -> String {
        format!("{}states/{}/{}", self.key_prefix, name, machine_id)
    }

    fn unit_states_prefix(&self) -> String {
        format!("{}states", self.key_prefix)
    }

    fn unit_states_path_for(&self, name: &str) -> String {
        format!("{}states/{}", self.key_prefix, name)
    }

    pub(crate) fn engine_lease_path(&self) -> String {
        format!("{}lease/engine", self.key_prefix)
    }

    /// Treat a missing key as an empty listing; propagate everything else.
    fn absent_as_empty(
        result: Result<Vec<crate::kv::KvPair>, KvError>,
    ) -> Result<Vec<crate::kv::KvPair>, RegistryError> {
        match result {
            Ok(pairs) => Ok(pairs),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! A recording store client for asserting exact read/write sequences.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::kv::{DeleteOptions, KvClient, KvError, KvPair, SetOptions};

    /// One observed store operation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Action {
        pub key: String,
        pub value: String,
        pub recursive: bool,
    }

    impl Action {
        pub fn key(key: &str) -> Self {
            Self {
                key: key.to_string(),
                value: String::new(),
                recursive: false,
            }
        }

        pub fn set(key: &str, value: &str) -> Self {
            Self {
                key: key.to_string(),
                value: value.to_string(),
                recursive: false,
            }
        }

        pub fn recursive(key: &str) -> Self {
            Self {
                key: key.to_string(),
                value: String::new(),
                recursive: true,
            }
        }
    }

    /// Scripted outcome for one store call.
    pub enum Scripted {
        Pairs(Vec<KvPair>),
        Fail(KvError),
    }

    /// Records every call and answers from a scripted queue; with an empty
    /// queue, reads miss and writes succeed.
    #[derive(Default)]
    pub struct RecordingKv {
        pub gets: Mutex<Vec<Action>>,
        pub sets: Mutex<Vec<Action>>,
        pub deletes: Mutex<Vec<Action>>,
        script: Mutex<VecDeque<Scripted>>,
    }

    impl RecordingKv {
        pub fn scripted(outcomes: Vec<Scripted>) -> Self {
            Self {
                script: Mutex::new(outcomes.into()),
                ..Default::default()
            }
        }

        fn next(&self) -> Option<Scripted> {
            self.script.lock().unwrap().pop_front()
        }
    }

    #[async_trait::async_trait]
    impl KvClient for RecordingKv {
        async fn get(&self, key: &str) -> Result<KvPair, KvError> {
            self.gets.lock().unwrap().push(Action::key(key));
            match self.next() {
                Some(Scripted::Fail(e)) => Err(e),
                Some(Scripted::Pairs(pairs)) => pairs
                    .into_iter()
                    .next()
                    .ok_or_else(|| KvError::NotFound(key.to_string())),
                None => Err(KvError::NotFound(key.to_string())),
            }
        }

        async fn list(&self, key: &str) -> Result<Vec<KvPair>, KvError> {
            self.gets.lock().unwrap().push(Action::recursive(key));
            match self.next() {
                Some(Scripted::Fail(e)) => Err(e),
                Some(Scripted::Pairs(pairs)) => Ok(pairs),
                None => Err(KvError::NotFound(key.to_string())),
            }
        }

        async fn set(&self, key: &str, value: &str, _opts: SetOptions) -> Result<(), KvError> {
            self.sets.lock().unwrap().push(Action::set(key, value));
            match self.next() {
                Some(Scripted::Fail(e)) => Err(e),
                _ => Ok(()),
            }
        }

        async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<(), KvError> {
            let action = if opts.recursive {
                Action::recursive(key)
            } else {
                Action::key(key)
            };
            self.deletes.lock().unwrap().push(action);
            match self.next() {
                Some(Scripted::Fail(e)) => Err(e),
                _ => Ok(()),
            }
        }
    }
}
