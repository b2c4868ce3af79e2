//! Concurrency gate — per-credential and global admission control.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::credential::CredentialRegistry;
use crate::error::GateError;

/// Bounds concurrent executions per credential and across the whole pool.
///
/// One counting permit pool per credential plus one global pool.
/// [`acquire`](Self::acquire) suspends the calling worker until both a
/// credential permit and a global permit are available.
pub struct ConcurrencyGate {
    registry: Arc<CredentialRegistry>,
    global: Arc<Semaphore>,
    per_credential: HashMap<String, Arc<Semaphore>>,
}

/// Proof of admission for one execution on one credential.
///
/// Holds both semaphore permits and the registry's busy mark; dropping it
/// releases everything, on every exit path including an unwinding executor.
/// Release-without-acquire is unrepresentable — there is no other way to
/// touch the permit pools.
#[must_use = "dropping the permit immediately releases the credential"]
pub struct GatePermit {
    registry: Arc<CredentialRegistry>,
    key: String,
    _credential: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Key of the admitted credential.
    pub fn credential_key(&self) -> &str {
        &self.key
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.registry.mark_free(&self.key);
        trace!(credential = %self.key, "gate permit released");
    }
}

impl ConcurrencyGate {
    /// Build permit pools for every configured credential.
    pub fn new(
        registry: Arc<CredentialRegistry>,
        max_per_credential: usize,
        max_total: usize,
    ) -> Self {
        let per_credential = registry
            .keys()
            .into_iter()
            .map(|key| (key, Arc::new(Semaphore::new(max_per_credential))))
            .collect();

        Self {
            registry,
            global: Arc::new(Semaphore::new(max_total)),
            per_credential,
        }
    }

    /// Wait until `key` has spare capacity under both bounds.
    ///
    /// Suspends rather than spinning; fairness comes from the semaphores'
    /// FIFO waiter queues.
    pub async fn acquire(&self, key: &str) -> Result<GatePermit, GateError> {
        let semaphore = self
            .per_credential
            .get(key)
            .ok_or_else(|| GateError::UnknownCredential {
                key: key.to_string(),
            })?;

        // The pools are never closed, so acquisition can only fail on a
        // broken invariant; fail loudly rather than limp on.
        let credential = Arc::clone(semaphore)
            .acquire_owned()
            .await
            .expect("credential permit pool closed");
        let global = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .expect("global permit pool closed");

        self.registry.mark_busy(key);
        trace!(credential = %key, "gate permit acquired");

        Ok(GatePermit {
            registry: Arc::clone(&self.registry),
            key: key.to_string(),
            _credential: credential,
            _global: global,
        })
    }

    /// Permits currently available on the global pool.
    pub fn global_available(&self) -> usize {
        self.global.available_permits()
    }

    /// Permits currently available for one credential.
    pub fn credential_available(&self, key: &str) -> Option<usize> {
        self.per_credential.get(key).map(|s| s.available_permits())
    }
}
