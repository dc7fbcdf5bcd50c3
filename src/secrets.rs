//! Secret resolution and redaction
//!
//! Secrets come from the process environment only, are resolved once at
//! load time, and never appear in configuration files, logs, or stored
//! output. Every resolved value feeds the [`Redactor`] that scrubs
//! captured output before it is persisted.

use crate::core::config::ConfigError;
use std::collections::HashMap;

/// Registry credentials every build stage needs
pub const REGISTRY_SECRETS: &[&str] = &["REGISTRY_USER", "REGISTRY_TOKEN"];

/// Remote-target credentials every deploy stage needs. `DEPLOY_KEY_FILE`
/// (path to the ssh identity file) is optional and honored when declared.
pub const DEPLOY_SECRETS: &[&str] = &["DEPLOY_HOST", "DEPLOY_USER"];

pub const REGISTRY_USER: &str = "REGISTRY_USER";
pub const REGISTRY_TOKEN: &str = "REGISTRY_TOKEN";
pub const DEPLOY_HOST: &str = "DEPLOY_HOST";
pub const DEPLOY_USER: &str = "DEPLOY_USER";
pub const DEPLOY_KEY_FILE: &str = "DEPLOY_KEY_FILE";

/// Read-only lookup of named credentials
#[derive(Clone)]
pub struct SecretStore {
    values: HashMap<String, String>,
}

impl SecretStore {
    /// Resolve every required secret from the environment. A missing name
    /// is a configuration error (exit code 2), raised before any stage
    /// runs.
    pub fn from_env(required: &[String]) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        for name in required {
            match std::env::var(name) {
                Ok(value) => {
                    values.insert(name.clone(), value);
                }
                Err(_) => return Err(ConfigError::MissingSecret(name.clone())),
            }
        }
        Ok(Self { values })
    }

    /// Build a store from explicit values (tests)
    pub fn from_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// A redactor covering every value in the store
    pub fn redactor(&self) -> Redactor {
        Redactor::new(self.values.values().cloned())
    }
}

// Secret values must not leak through debug formatting.
impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("SecretStore").field("names", &names).finish()
    }
}

const MASK: &str = "[redacted]";

/// Replaces known secret values in text before it is logged or stored
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    /// Longest values first, so a secret that contains another secret is
    /// masked whole
    values: Vec<String>,
}

impl Redactor {
    pub fn new<I: IntoIterator<Item = String>>(values: I) -> Self {
        let mut values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
        values.sort_by(|a, b| b.len().cmp(&a.len()));
        Self { values }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for value in &self.values {
            redacted = redacted.replace(value.as_str(), MASK);
        }
        redacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_secret_is_config_error() {
        let required = vec!["SLIPWAY_TEST_SECRET_THAT_DOES_NOT_EXIST".to_string()];
        assert!(matches!(
            SecretStore::from_env(&required),
            Err(ConfigError::MissingSecret(_))
        ));
    }

    #[test]
    fn test_lookup() {
        let store = SecretStore::from_values([("REGISTRY_TOKEN", "hunter2")]);
        assert_eq!(store.get("REGISTRY_TOKEN"), Some("hunter2"));
        assert_eq!(store.get("OTHER"), None);
    }

    #[test]
    fn test_debug_hides_values() {
        let store = SecretStore::from_values([("REGISTRY_TOKEN", "hunter2")]);
        let debug = format!("{:?}", store);
        assert!(debug.contains("REGISTRY_TOKEN"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_redact_masks_values() {
        let redactor = Redactor::new(vec!["hunter2".to_string()]);
        assert_eq!(
            redactor.redact("login with hunter2 ok"),
            "login with [redacted] ok"
        );
    }

    #[test]
    fn test_redact_longest_value_first() {
        let redactor = Redactor::new(vec!["abc".to_string(), "abcdef".to_string()]);
        assert_eq!(redactor.redact("token=abcdef"), "token=[redacted]");
    }

    #[test]
    fn test_redact_ignores_empty_values() {
        let redactor = Redactor::new(vec![String::new()]);
        assert_eq!(redactor.redact("unchanged"), "unchanged");
    }
}
