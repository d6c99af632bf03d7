//! Secret lookup.

use std::collections::BTreeMap;

use crate::error::MissingSecretError;

/// Source of credentials such as release tokens and webhook URLs.
pub trait SecretsProvider: Send + Sync {
    fn get(&self, key: &str) -> Result<String, MissingSecretError>;

    /// Lookup for secrets whose absence means "skip", not "fail".
    fn optional(&self, key: &str) -> Option<String> {
        self.get(key).ok()
    }
}

/// Secrets held in memory.
#[derive(Debug, Clone, Default)]
pub struct MapSecrets {
    values: BTreeMap<String, String>,
}

impl MapSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SecretsProvider for MapSecrets {
    fn get(&self, key: &str) -> Result<String, MissingSecretError> {
        self.values
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| MissingSecretError {
                key: key.to_string(),
            })
    }
}

/// Secrets read from `<PREFIX><KEY>` environment variables.
///
/// Keys are upper-cased and `-`/`.` become `_`, so `ghToken` is read from
/// `BRIG_SECRET_GHTOKEN`.
#[derive(Debug, Clone)]
pub struct EnvSecrets {
    prefix: String,
}

impl EnvSecrets {
    pub const DEFAULT_PREFIX: &'static str = "BRIG_SECRET_";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable_name(&self, key: &str) -> String {
        let key: String = key
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{}", self.prefix, key)
    }
}

impl Default for EnvSecrets {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

impl SecretsProvider for EnvSecrets {
    fn get(&self, key: &str) -> Result<String, MissingSecretError> {
        std::env::var(self.variable_name(key))
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| MissingSecretError {
                key: key.to_string(),
            })
    }
}
