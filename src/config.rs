use crate::error::{PkiError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Subject common name of the root certificate authority.
pub const DEFAULT_ROOT_CA_NAME: &str = "operator-root-ca";

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Naming and lifetime settings shared by every tier of the hierarchy.
///
/// The defaults are the production values: a 10 year root, a 1 year
/// namespace intermediate and a 90 day leaf, each backdated by one hour to
/// tolerate clock skew between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiConfig {
    pub root_common_name: String,
    pub root_validity_days: u32,
    pub intermediate_validity_days: u32,
    pub leaf_validity_days: u32,
    pub clock_skew_tolerance_secs: u64,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            root_common_name: DEFAULT_ROOT_CA_NAME.to_string(),
            root_validity_days: 10 * 365,
            intermediate_validity_days: 365,
            leaf_validity_days: 90,
            clock_skew_tolerance_secs: 60 * 60,
        }
    }
}

impl PkiConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PkiConfig =
            toml::from_str(&content).map_err(|e| PkiError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Layers the defaults, an optional TOML file and `PKI_*` environment
    /// variables, then validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&PkiConfig::default())
            .map_err(|e| PkiError::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(config::Environment::with_prefix("PKI").try_parsing(true));

        let config: PkiConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| PkiError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_common_name.trim().is_empty() {
            return Err(PkiError::InvalidConfig(
                "root_common_name cannot be empty".to_string(),
            ));
        }

        if self.root_validity_days == 0
            || self.intermediate_validity_days == 0
            || self.leaf_validity_days == 0
        {
            return Err(PkiError::InvalidConfig(
                "certificate validity days must be greater than 0".to_string(),
            ));
        }

        if self.root_validity_days <= self.intermediate_validity_days {
            return Err(PkiError::InvalidConfig(
                "root_validity_days must exceed intermediate_validity_days".to_string(),
            ));
        }

        if self.intermediate_validity_days <= self.leaf_validity_days {
            return Err(PkiError::InvalidConfig(
                "intermediate_validity_days must exceed leaf_validity_days".to_string(),
            ));
        }

        Ok(())
    }

    pub fn root_validity(&self) -> Duration {
        days(self.root_validity_days)
    }

    pub fn intermediate_validity(&self) -> Duration {
        days(self.intermediate_validity_days)
    }

    pub fn leaf_validity(&self) -> Duration {
        days(self.leaf_validity_days)
    }

    pub fn clock_skew_tolerance(&self) -> Duration {
        Duration::from_secs(self.clock_skew_tolerance_secs)
    }
}

fn days(count: u32) -> Duration {
    Duration::from_secs(u64::from(count) * SECONDS_PER_DAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = PkiConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.root_common_name, DEFAULT_ROOT_CA_NAME);
        assert_eq!(config.root_validity(), Duration::from_secs(3650 * SECONDS_PER_DAY));
        assert_eq!(config.intermediate_validity(), Duration::from_secs(365 * SECONDS_PER_DAY));
        assert_eq!(config.leaf_validity(), Duration::from_secs(90 * SECONDS_PER_DAY));
        assert_eq!(config.clock_skew_tolerance(), Duration::from_secs(3600));
    }

    #[test]
    fn test_config_validation() {
        let mut config = PkiConfig::default();
        config.root_common_name = "  ".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("root_common_name"));

        let mut config = PkiConfig::default();
        config.leaf_validity_days = 0;
        assert!(config.validate().unwrap_err().to_string().contains("greater than 0"));

        let mut config = PkiConfig::default();
        config.intermediate_validity_days = config.root_validity_days;
        assert!(config.validate().is_err());

        let mut config = PkiConfig::default();
        config.leaf_validity_days = config.intermediate_validity_days + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_serialization_deserialization() {
        let config = PkiConfig {
            root_common_name: "staging-root-ca".to_string(),
            ..Default::default()
        };

        let toml_string = toml::to_string(&config).unwrap();
        let deserialized: PkiConfig = toml::from_str(&toml_string).unwrap();

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "leaf_validity_days = 30").unwrap();

        let config = PkiConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.leaf_validity_days, 30);
        assert_eq!(config.root_common_name, DEFAULT_ROOT_CA_NAME);
        assert_eq!(config.intermediate_validity_days, 365);
    }

    #[test]
    fn test_load_layers_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pki.toml");
        std::fs::write(&path, "root_common_name = \"layered-root\"\n").unwrap();

        let config = PkiConfig::load(Some(&path)).unwrap();
        assert_eq!(config.root_common_name, "layered-root");
        assert_eq!(config.leaf_validity_days, 90);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pki.toml");
        std::fs::write(&path, "leaf_validity_days = 400\n").unwrap();

        let result = PkiConfig::load(Some(&path));
        assert!(matches!(result, Err(PkiError::InvalidConfig(_))));
    }
}
