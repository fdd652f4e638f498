//! Environment lookups behind a trait so tests can inject values

use std::collections::HashMap;

#[cfg(test)]
use mockall::automock;

/// Source of environment configuration
#[cfg_attr(test, automock)]
pub trait EnvSource: Send + Sync {
    /// Value of `key`, or None when unset or empty
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed map of values, for tests and embedding
#[derive(Clone, Debug, Default)]
pub struct StaticEnv(HashMap<String, String>);

impl StaticEnv {
    /// Build from key/value pairs
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl EnvSource for StaticEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).filter(|v| !v.is_empty()).cloned()
    }
}
