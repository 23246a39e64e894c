//! In-memory key-value backend.
//!
//! Mirrors the store semantics the registry relies on (create-only and
//! compare-and-swap writes, TTL expiry, recursive listing and deletion) so
//! tests and local development need no external store.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use super::{DeleteOptions, KvClient, KvError, KvPair, SetOptions};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-memory store, safe to share behind an `Arc`.
#[derive(Default)]
pub struct MemKv {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(key: &str) -> String {
        let key = key.trim_end_matches('/');
        if key.starts_with('/') {
            key.to_string()
        } else {
            format!("/{key}")
        }
    }

    fn prune(entries: &mut BTreeMap<String, Entry>) {
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at.map(|at| at > now).unwrap_or(true));
    }
}

#[async_trait::async_trait]
impl KvClient for MemKv {
    async fn get(&self, key: &str) -> Result<KvPair, KvError> {
        let key = Self::normalize(key);
        let mut entries = self.entries.lock().unwrap();
        Self::prune(&mut entries);

        match entries.get(&key) {
            Some(entry) => Ok(KvPair {
                key,
                value: entry.value.clone(),
            }),
            None => Err(KvError::NotFound(key)),
        }
    }

    async fn list(&self, key: &str) -> Result<Vec<KvPair>, KvError> {
        let key = Self::normalize(key);
        let mut entries = self.entries.lock().unwrap();
        Self::prune(&mut entries);

        let prefix = format!("{key}/");
        let pairs: Vec<KvPair> = entries
            .iter()
            .filter(|(k, _)| **k == key || k.starts_with(&prefix))
            .map(|(k, e)| KvPair {
                key: k.clone(),
                value: e.value.clone(),
            })
            .collect();

        if pairs.is_empty() {
            return Err(KvError::NotFound(key));
        }
        Ok(pairs)
    }

    async fn set(&self, key: &str, value: &str, opts: SetOptions) -> Result<(), KvError> {
        let key = Self::normalize(key);
        let mut entries = self.entries.lock().unwrap();
        Self::prune(&mut entries);

        let existing = entries.get(&key);
        match opts.prev_exist {
            Some(false) if existing.is_some() => {
                return Err(KvError::AlreadyExists(key));
            }
            Some(true) if existing.is_none() => {
                return Err(KvError::NotFound(key));
            }
            _ => {}
        }
        if let Some(prev_value) = &opts.prev_value {
            match existing {
                None => return Err(KvError::NotFound(key)),
                Some(entry) if entry.value != *prev_value => {
                    return Err(KvError::CompareFailed {
                        key,
                        message: format!("expected {prev_value}, found {}", entry.value),
                    });
                }
                Some(_) => {}
            }
        }

        entries.insert(
            key,
            Entry {
                value: value.to_string(),
                expires_at: opts.ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<(), KvError> {
        let key = Self::normalize(key);
        let mut entries = self.entries.lock().unwrap();
        Self::prune(&mut entries);

        if opts.recursive {
            let prefix = format!("{key}/");
            let before = entries.len();
            entries.retain(|k, _| *k != key && !k.starts_with(&prefix));
            if entries.len() == before {
                return Err(KvError::NotFound(key));
            }
            return Ok(());
        }

        match entries.get(&key) {
            None => Err(KvError::NotFound(key)),
            Some(entry) => {
                if let Some(prev_value) = &opts.prev_value {
                    if entry.value != *prev_value {
                        return Err(KvError::CompareFailed {
                            key,
                            message: format!("expected {prev_value}, found {}", entry.value),
                        });
                    }
                }
                entries.remove(&key);
                Ok(())
            }
        }
    }
}
