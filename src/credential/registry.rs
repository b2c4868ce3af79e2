//! Credential registry — configured identities plus shared counters.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::credential::Credential;
use crate::error::ConfigError;

/// Per-credential counters, guarded by the registry lock.
#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    /// Total selections over the process lifetime. Saturates rather than
    /// wrapping; it is observational only.
    usage: u64,
    /// Current in-flight executions.
    active: u32,
}

/// Point-in-time view of one credential's counters.
#[derive(Debug, Clone)]
pub struct CredentialSnapshot {
    pub key: String,
    pub usage_count: u64,
    pub active_tasks: u32,
}

/// Immutable set of configured credentials with usage/in-flight counters.
///
/// The credential list and its order are fixed at construction. Counters are
/// the only mutable state and are mutated exclusively through
/// [`record_use`](Self::record_use), [`mark_busy`](Self::mark_busy) and
/// [`mark_free`](Self::mark_free); all three are single-operation updates
/// under one lock, never held across an await point.
#[derive(Debug)]
pub struct CredentialRegistry {
    credentials: Vec<Credential>,
    index: HashMap<String, usize>,
    counters: Mutex<Vec<Counters>>,
}

impl CredentialRegistry {
    /// Build the registry from configured credentials.
    ///
    /// Refuses an empty list (no credentials means no capacity) and
    /// duplicate keys (counters are keyed by credential key).
    pub fn new(credentials: Vec<Credential>) -> Result<Self, ConfigError> {
        if credentials.is_empty() {
            return Err(ConfigError::NoCredentials);
        }

        let mut index = HashMap::with_capacity(credentials.len());
        for (i, cred) in credentials.iter().enumerate() {
            if index.insert(cred.key.clone(), i).is_some() {
                return Err(ConfigError::DuplicateKey {
                    key: cred.key.clone(),
                });
            }
        }

        let counters = Mutex::new(vec![Counters::default(); credentials.len()]);
        Ok(Self {
            credentials,
            index,
            counters,
        })
    }

    /// Number of configured credentials.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Credential keys in configuration order.
    pub fn keys(&self) -> Vec<String> {
        self.credentials.iter().map(|c| c.key.clone()).collect()
    }

    /// Look up a credential by key.
    pub fn get(&self, key: &str) -> Option<&Credential> {
        self.index.get(key).map(|&i| &self.credentials[i])
    }

    /// Credential at a configuration-order position.
    pub fn at(&self, position: usize) -> &Credential {
        &self.credentials[position]
    }

    /// Whether a key is configured.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Record a selection of the credential at `position`.
    pub fn record_use(&self, position: usize) {
        let mut counters = self.counters.lock().expect("credential counter lock poisoned");
        counters[position].usage = counters[position].usage.saturating_add(1);
    }

    /// Record a selection of `key`. Used when a task bypasses the selector
    /// by pinning a credential; every dispatched request counts toward
    /// usage either way.
    pub fn record_use_by_key(&self, key: &str) {
        if let Some(&i) = self.index.get(key) {
            self.record_use(i);
        }
    }

    /// Increment the in-flight count for `key`. Called by the gate on acquire.
    pub fn mark_busy(&self, key: &str) {
        let Some(&i) = self.index.get(key) else {
            panic!("mark_busy on unconfigured credential {key}");
        };
        let mut counters = self.counters.lock().expect("credential counter lock poisoned");
        counters[i].active += 1;
        debug!(credential = key, active = counters[i].active, "credential busy");
    }

    /// Decrement the in-flight count for `key`. Called by the gate on release.
    ///
    /// Panics on underflow: a release without a matching acquire means the
    /// concurrency accounting is corrupt, and continuing would hide it.
    pub fn mark_free(&self, key: &str) {
        let Some(&i) = self.index.get(key) else {
            panic!("mark_free on unconfigured credential {key}");
        };
        let mut counters = self.counters.lock().expect("credential counter lock poisoned");
        assert!(
            counters[i].active > 0,
            "release without matching acquire for credential {key}"
        );
        counters[i].active -= 1;
        debug!(credential = key, active = counters[i].active, "credential free");
    }

    /// Current in-flight count for `key`.
    pub fn active_tasks(&self, key: &str) -> Option<u32> {
        let i = *self.index.get(key)?;
        let counters = self.counters.lock().expect("credential counter lock poisoned");
        Some(counters[i].active)
    }

    /// Counter snapshot for all credentials, in configuration order.
    pub fn snapshot(&self) -> Vec<CredentialSnapshot> {
        let counters = self.counters.lock().expect("credential counter lock poisoned");
        self.credentials
            .iter()
            .zip(counters.iter())
            .map(|(cred, c)| CredentialSnapshot {
                key: cred.key.clone(),
                usage_count: c.usage,
                active_tasks: c.active,
            })
            .collect()
    }
}
