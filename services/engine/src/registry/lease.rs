//! The engine leadership lease.
//!
//! A single key with a TTL guards the reconciler cluster-wide: whoever
//! creates it leads, and must keep renewing it on a cadence strictly
//! shorter than the TTL. Renewal is a compare-and-swap on the holder's own
//! id, so a lease that expired and was re-acquired elsewhere can never be
//! renewed by the old holder.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::Registry;
use crate::kv::{DeleteOptions, KvClient, KvError, SetOptions};

pub struct EngineLease {
    kv: Arc<dyn KvClient>,
    key: String,
    id: String,
    ttl: Duration,
}

impl Registry {
    /// A leadership lease handle for the engine instance `id`.
    pub fn engine_lease(&self, id: impl Into<String>, ttl: Duration) -> EngineLease {
        EngineLease {
            kv: self.kv.clone(),
            key: self.engine_lease_path(),
            id: id.into(),
            ttl,
        }
    }
}

impl EngineLease {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Try to take the lease. `Ok(false)` means another engine holds it.
    pub async fn acquire(&self) -> Result<bool, KvError> {
        let opts = SetOptions::create_only().with_ttl(self.ttl);
        match self.kv.set(&self.key, &self.id, opts).await {
            Ok(()) => Ok(true),
            Err(KvError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Extend a held lease. `Ok(false)` means the lease was lost.
    pub async fn renew(&self) -> Result<bool, KvError> {
        let opts = SetOptions {
            ttl: Some(self.ttl),
            prev_exist: Some(true),
            prev_value: Some(self.id.clone()),
        };
        match self.kv.set(&self.key, &self.id, opts).await {
            Ok(()) => Ok(true),
            Err(KvError::NotFound(_)) | Err(KvError::CompareFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Give the lease up voluntarily. Best-effort: failures are logged,
    /// expiry will reclaim the key regardless.
    pub async fn release(&self) {
        let opts = DeleteOptions {
            prev_value: Some(self.id.clone()),
            ..Default::default()
        };
        match self.kv.delete(&self.key, opts).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(error) => warn!(%error, "failed releasing engine lease"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::Registry;
    use super::*;
    use crate::kv::MemKv;

    fn registry() -> Registry {
        Registry::new(Arc::new(MemKv::new()), "/flotilla/")
    }

    #[tokio::test]
    async fn test_only_one_holder() {
        let registry = registry();
        let first = registry.engine_lease("engine-1", Duration::from_secs(10));
        let second = registry.engine_lease("engine-2", Duration::from_secs(10));

        assert!(first.acquire().await.unwrap());
        assert!(!second.acquire().await.unwrap());
        assert!(first.renew().await.unwrap());
        assert!(!second.renew().await.unwrap());
    }

    #[tokio::test]
    async fn test_release_hands_off() {
        let registry = registry();
        let first = registry.engine_lease("engine-1", Duration::from_secs(10));
        let second = registry.engine_lease("engine-2", Duration::from_secs(10));

        assert!(first.acquire().await.unwrap());
        first.release().await;
        assert!(!first.renew().await.unwrap());
        assert!(second.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_expiry_allows_takeover() {
        let registry = registry();
        let first = registry.engine_lease("engine-1", Duration::from_millis(20));
        let second = registry.engine_lease("engine-2", Duration::from_secs(10));

        assert!(first.acquire().await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(second.acquire().await.unwrap());
        // The old holder cannot renew over the new one.
        assert!(!first.renew().await.unwrap());
    }
}
