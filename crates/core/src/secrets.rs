//! Secret resolution.
//!
//! Manifests only name the secrets they need. Values come from a
//! [`SecretSource`] (the process environment in production) and travel in a
//! [`SecretMap`], which never prints its values.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::ConfigError;
use crate::manifest::SecretSpec;

/// Where secret values are looked up.
pub trait SecretSource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads secrets from process environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl SecretSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

impl SecretSource for BTreeMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        BTreeMap::get(self, name).cloned()
    }
}

/// Resolved name → value pairs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretMap(BTreeMap<String, String>);

impl SecretMap {
    /// Resolve every secret in `spec`. Literal values are taken as-is, names
    /// are looked up in `source`. `owner` names the agent or tool in errors.
    pub fn resolve(
        spec: &SecretSpec,
        source: &dyn SecretSource,
        owner: &str,
    ) -> Result<Self, ConfigError> {
        match spec {
            SecretSpec::Values(values) => Ok(Self(values.clone())),
            SecretSpec::Names(names) => names
                .iter()
                .map(|name| {
                    source
                        .get(name)
                        .map(|value| (name.clone(), value))
                        .ok_or_else(|| ConfigError::MissingSecret {
                            name: name.clone(),
                            owner: owner.to_string(),
                        })
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Self),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Debug for SecretMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

impl FromIterator<(String, String)> for SecretMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> HashMap<String, String> {
        HashMap::from([("WEATHER_KEY".to_string(), "s3cret".to_string())])
    }

    #[test]
    fn test_resolve_names() {
        let spec = SecretSpec::Names(vec!["WEATHER_KEY".into()]);
        let secrets = SecretMap::resolve(&spec, &source(), "tool 'weather'").unwrap();
        assert_eq!(secrets.get("WEATHER_KEY"), Some("s3cret"));
        assert_eq!(secrets.len(), 1);
    }

    #[test]
    fn test_missing_secret_names_owner() {
        let spec = SecretSpec::Names(vec!["WEATHER_KEY".into(), "OTHER".into()]);
        let err = SecretMap::resolve(&spec, &source(), "tool 'weather'").unwrap_err();
        match err {
            ConfigError::MissingSecret { name, owner } => {
                assert_eq!(name, "OTHER");
                assert_eq!(owner, "tool 'weather'");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_literal_values_skip_source() {
        let spec = SecretSpec::Values(BTreeMap::from([("TOKEN".into(), "literal".into())]));
        let empty: HashMap<String, String> = HashMap::new();
        let secrets = SecretMap::resolve(&spec, &empty, "agent 'helper'").unwrap();
        assert_eq!(secrets.get("TOKEN"), Some("literal"));
    }

    #[test]
    fn test_debug_redacts_values() {
        let secrets: SecretMap = [("API_KEY".to_string(), "sk-123".to_string())]
            .into_iter()
            .collect();
        let printed = format!("{secrets:?}");
        assert!(printed.contains("API_KEY"));
        assert!(!printed.contains("sk-123"));
    }
}
