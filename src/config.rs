use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use echoprobe::codec::MAX_PAYLOAD_SIZE;

/// Settings for the echoprobe driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub probe: ProbeConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_ms: u64,
    pub payload_size: usize,
    /// Echo requests per target
    pub count: u32,
    /// Extra attempts for a probe that did not succeed
    pub retries: u32,
    /// Number of workers, each with its own transport handle
    pub parallelism: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub default_format: String,
    pub color_enabled: bool,
    pub show_dead_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            payload_size: 32,
            count: 1,
            retries: 0,
            parallelism: 8,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_format: "human".to_string(),
            color_enabled: true,
            show_dead_hosts: true,
        }
    }
}

impl Config {
    /// Load from the standard config location, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = Self::get_config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Get the path to the config file
    pub fn get_config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("echoprobe");
        path.push("config.json");
        path
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        if self.probe.timeout_ms == 0 {
            return Err(anyhow::anyhow!("timeout_ms must be greater than 0"));
        }

        if self.probe.payload_size > MAX_PAYLOAD_SIZE {
            return Err(anyhow::anyhow!(
                "payload_size must not exceed {} bytes",
                MAX_PAYLOAD_SIZE
            ));
        }

        if self.probe.count == 0 {
            return Err(anyhow::anyhow!("count must be greater than 0"));
        }

        if self.probe.parallelism == 0 {
            return Err(anyhow::anyhow!("parallelism must be greater than 0"));
        }

        if !matches!(self.output.default_format.as_str(), "human" | "json") {
            return Err(anyhow::anyhow!("default_format must be one of: human, json"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.probe.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.probe.payload_size = MAX_PAYLOAD_SIZE + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.output.default_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.probe.timeout_ms = 250;
        config.probe.retries = 2;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.probe.timeout_ms, 250);
        assert_eq!(loaded.probe.retries, 2);
        assert_eq!(loaded.output.default_format, "human");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "probe": { "count": 4 } }"#).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.probe.count, 4);
        assert_eq!(loaded.probe.timeout_ms, 1000);
        assert!(loaded.output.color_enabled);
    }
}
