//! Credential selection policy.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use tracing::debug;

use crate::credential::{CredentialRegistry, SelectionMode};

/// Picks the next credential for a dispatch.
///
/// Selection only *names* a credential; whether it currently has spare
/// capacity is the gate's concern. A selected credential may be saturated,
/// in which case the worker blocks at the gate, not here.
pub struct CredentialSelector {
    mode: SelectionMode,
    /// Shared round-robin cursor, advanced atomically per selection.
    cursor: AtomicUsize,
}

impl CredentialSelector {
    pub fn new(mode: SelectionMode) -> Self {
        Self {
            mode,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Configured selection mode.
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Choose a credential key and record its use.
    ///
    /// `mode_override` substitutes the configured mode for this one
    /// selection (per-request override, carried on the task payload).
    pub fn select(
        &self,
        registry: &CredentialRegistry,
        mode_override: Option<SelectionMode>,
    ) -> String {
        let mode = mode_override.unwrap_or(self.mode);
        let position = match mode {
            SelectionMode::Default => 0,
            SelectionMode::Random => rand::thread_rng().gen_range(0..registry.len()),
            SelectionMode::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % registry.len()
            }
            SelectionMode::LeastBusy => Self::least_busy_position(registry),
        };

        registry.record_use(position);
        let key = registry.at(position).key.clone();
        debug!(credential = %key, mode = %mode, "credential selected");
        key
    }

    /// Position of the credential with the smallest in-flight count.
    /// Strict `<` over a configuration-order scan gives a stable,
    /// deterministic tie-break on the earliest credential.
    fn least_busy_position(registry: &CredentialRegistry) -> usize {
        let snapshot = registry.snapshot();
        let mut best = 0;
        for (i, entry) in snapshot.iter().enumerate().skip(1) {
            if entry.active_tasks < snapshot[best].active_tasks {
                best = i;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;

    fn registry(keys: &[&str]) -> CredentialRegistry {
        let creds: Vec<Credential> = keys
            .iter()
            .map(|k| {
                serde_json::from_str(&format!(
                    r#"{{"key":"{k}","email":"{k}@example.com","password":"pw"}}"#
                ))
                .unwrap()
            })
            .collect();
        CredentialRegistry::new(creds).unwrap()
    }

    #[test]
    fn default_mode_always_first() {
        let reg = registry(&["a", "b", "c"]);
        let sel = CredentialSelector::new(SelectionMode::Default);
        for _ in 0..5 {
            assert_eq!(sel.select(&reg, None), "a");
        }
    }

    #[test]
    fn round_robin_cycles_and_wraps() {
        let reg = registry(&["a", "b", "c"]);
        let sel = CredentialSelector::new(SelectionMode::RoundRobin);
        assert_eq!(sel.select(&reg, None), "a");
        assert_eq!(sel.select(&reg, None), "b");
        assert_eq!(sel.select(&reg, None), "c");
        assert_eq!(sel.select(&reg, None), "a");
    }

    #[test]
    fn least_busy_picks_minimum() {
        let reg = registry(&["a", "b", "c"]);
        reg.mark_busy("a");
        reg.mark_busy("a");
        reg.mark_busy("c");
        let sel = CredentialSelector::new(SelectionMode::LeastBusy);
        assert_eq!(sel.select(&reg, None), "b");
    }

    #[test]
    fn least_busy_tie_breaks_by_configuration_order() {
        let reg = registry(&["a", "b"]);
        reg.mark_busy("a");
        reg.mark_busy("b");
        let sel = CredentialSelector::new(SelectionMode::LeastBusy);
        assert_eq!(sel.select(&reg, None), "a");
    }

    #[test]
    fn random_mode_only_yields_configured_keys() {
        let reg = registry(&["a", "b"]);
        let sel = CredentialSelector::new(SelectionMode::Random);
        for _ in 0..20 {
            let key = sel.select(&reg, None);
            assert!(key == "a" || key == "b");
        }
    }

    #[test]
    fn mode_override_takes_precedence() {
        let reg = registry(&["a", "b"]);
        let sel = CredentialSelector::new(SelectionMode::Default);
        assert_eq!(sel.select(&reg, Some(SelectionMode::RoundRobin)), "a");
        assert_eq!(sel.select(&reg, Some(SelectionMode::RoundRobin)), "b");
    }

    #[test]
    fn selection_records_usage() {
        let reg = registry(&["a", "b"]);
        let sel = CredentialSelector::new(SelectionMode::Default);
        sel.select(&reg, None);
        sel.select(&reg, None);
        let snap = reg.snapshot();
        assert_eq!(snap[0].usage_count, 2);
        assert_eq!(snap[1].usage_count, 0);
    }
}
