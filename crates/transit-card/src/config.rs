//! Deployment configuration
//!
//! Everything that varies between deployments without code changes: the
//! layout table, the selection scenario, the access levels used per
//! operation and the default key identifiers. Loaded from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, LayoutError};
use crate::layout::{LayoutResolver, ProductProfile};
use crate::security::{AccessLevel, DefaultKifs};
use crate::selection::{CardSelector, SelectionScenario};

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "TRANSIT_CONFIG";

/// Access level used by each repository operation on secure cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub read: AccessLevel,
    pub write: AccessLevel,
    pub personalize: AccessLevel,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            read: AccessLevel::Load,
            write: AccessLevel::Load,
            personalize: AccessLevel::Personalization,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitConfig {
    pub layout: Vec<ProductProfile>,
    pub scenario: SelectionScenario,
    pub access: AccessPolicy,
    pub default_kifs: DefaultKifs,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            layout: LayoutResolver::default_rows(),
            scenario: SelectionScenario::default(),
            access: AccessPolicy::default(),
            default_kifs: DefaultKifs::default(),
        }
    }
}

impl TransitConfig {
    /// Parse a JSON configuration. Omitted sections keep their defaults; the
    /// layout table is validated here.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.layout_resolver()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Load the file named by `TRANSIT_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn layout_resolver(&self) -> Result<LayoutResolver, LayoutError> {
        LayoutResolver::new(self.layout.clone())
    }

    pub fn selector(&self) -> CardSelector {
        CardSelector::new(self.scenario.clone())
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_common::ProductType;

    #[test]
    fn test_default_config_roundtrip() {
        let config = TransitConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(TransitConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = TransitConfig::from_json(
            r#"{ "access": { "read": "debit", "write": "debit", "personalize": "personalization" } }"#,
        )
        .unwrap();
        assert_eq!(config.access.read, AccessLevel::Debit);
        assert_eq!(config.layout, LayoutResolver::default_rows());
        assert_eq!(config.default_kifs, DefaultKifs::default());
    }

    #[test]
    fn test_incomplete_layout_is_rejected() {
        let mut config = TransitConfig::default();
        config.layout.retain(|row| row.product != ProductType::CalypsoLight);
        let json = config.to_json().unwrap();
        assert!(matches!(
            TransitConfig::from_json(&json),
            Err(ConfigError::Layout(LayoutError::MissingProduct(
                ProductType::CalypsoLight
            )))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            TransitConfig::load("/nonexistent/transit.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
