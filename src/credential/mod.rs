//! Credential types and selection policy.
//!
//! - `registry` — configured credential set plus usage/in-flight counters
//! - `selector` — pure policy choosing the next credential per dispatch

pub mod registry;
pub mod selector;

use secrecy::SecretString;
use serde::Deserialize;

pub use registry::{CredentialRegistry, CredentialSnapshot};
pub use selector::CredentialSelector;

/// One configured identity capable of executing tasks.
///
/// Identity (`key`) is immutable for the process lifetime. Authentication
/// material is owned by configuration and never touched by the core; the
/// password is wrapped so it cannot leak through logs or serialization.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    /// Unique key within the registry.
    pub key: String,
    /// Account identifier used by the external automation engine.
    pub email: String,
    /// Account secret; opaque to the core.
    pub password: SecretString,
}

/// How the selector picks a credential for the next dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Always the first configured credential.
    Default,
    /// Uniform choice, independent of prior usage.
    #[default]
    Random,
    /// Cycle through credentials in configuration order.
    RoundRobin,
    /// Smallest current in-flight count; ties broken by configuration order.
    LeastBusy,
}

impl std::str::FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "random" => Ok(Self::Random),
            "round_robin" => Ok(Self::RoundRobin),
            "least_busy" => Ok(Self::LeastBusy),
            other => Err(format!("unknown selection mode: {other}")),
        }
    }
}

impl std::fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::Random => "random",
            Self::RoundRobin => "round_robin",
            Self::LeastBusy => "least_busy",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_mode_from_str() {
        assert_eq!(
            "round_robin".parse::<SelectionMode>().unwrap(),
            SelectionMode::RoundRobin
        );
        assert_eq!(
            "least_busy".parse::<SelectionMode>().unwrap(),
            SelectionMode::LeastBusy
        );
        assert!("busiest".parse::<SelectionMode>().is_err());
    }

    #[test]
    fn selection_mode_serde() {
        let json = serde_json::to_string(&SelectionMode::LeastBusy).unwrap();
        assert_eq!(json, "\"least_busy\"");
        let parsed: SelectionMode = serde_json::from_str("\"round_robin\"").unwrap();
        assert_eq!(parsed, SelectionMode::RoundRobin);
    }

    #[test]
    fn credential_debug_hides_password() {
        let cred: Credential = serde_json::from_str(
            r#"{"key":"acc1","email":"a@example.com","password":"hunter2"}"#,
        )
        .unwrap();
        let dbg = format!("{cred:?}");
        assert!(!dbg.contains("hunter2"));
    }
}
