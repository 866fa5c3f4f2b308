//! Configuration management for the XCM orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relay: RelayConfig,
    pub parachains: Vec<ParachainConfig>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParachainConfig {
    pub para_id: u32,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub handshake_timeout_secs: u64,
    /// 0 waits for finality indefinitely
    pub tx_timeout_secs: u64,
    /// Signer for channel management calls
    pub sudo_seed: String,
    /// Parachains allowed as the source of a transfer
    pub transfer_source_chains: Vec<u32>,
    pub connect_on_startup: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 30,
            tx_timeout_secs: 0,
            sudo_seed: "//Alice".to_string(),
            transfer_source_chains: vec![1000, 1001],
            connect_on_startup: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn tx_timeout(&self) -> Option<Duration> {
        match self.tx_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9615,
        }
    }
}

impl Settings {
    /// Load settings from the file named by `XCM_ORCHESTRATOR_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("XCM_ORCHESTRATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.relay.url.is_empty() {
            anyhow::bail!("Relay chain has no URL configured");
        }

        if self.parachains.is_empty() {
            anyhow::bail!("At least one parachain must be configured");
        }

        let mut seen = HashSet::new();
        for para in &self.parachains {
            if para.url.is_empty() {
                anyhow::bail!("Parachain {} has no URL configured", para.para_id);
            }
            if !seen.insert(para.para_id) {
                anyhow::bail!("Parachain {} is configured twice", para.para_id);
            }
        }

        for source in &self.orchestrator.transfer_source_chains {
            if !seen.contains(source) {
                anyhow::bail!(
                    "Transfer source chain {} is not a configured parachain",
                    source
                );
            }
        }

        if self.orchestrator.handshake_timeout_secs == 0 {
            tracing::warn!("handshake_timeout_secs is 0; every connection attempt will time out");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [relay]
        url = "ws://127.0.0.1:9944"

        [[parachains]]
        para_id = 1000
        url = "ws://127.0.0.1:9946"

        [[parachains]]
        para_id = 1001
        url = "ws://127.0.0.1:9947"
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("XCM_TEST_VAR", "test_value");
        let input = "url = \"ws://${XCM_TEST_VAR}:9944\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"ws://test_value:9944\"");
    }

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        assert_eq!(settings.parachains.len(), 2);
        assert_eq!(settings.orchestrator.sudo_seed, "//Alice");
        assert_eq!(settings.orchestrator.transfer_source_chains, vec![1000, 1001]);
        assert_eq!(settings.orchestrator.tx_timeout(), None);
        assert_eq!(settings.orchestrator.handshake_timeout(), Duration::from_secs(30));
        assert!(!settings.metrics.enabled);
        assert_eq!(settings.parachains[1].para_id, 1001);
        assert_eq!(settings.parachains[1].url, "ws://127.0.0.1:9947");
    }

    #[test]
    fn test_rejects_duplicate_parachains() {
        let config = format!("{}\n[[parachains]]\npara_id = 1000\nurl = \"ws://x\"\n", SAMPLE);
        assert!(Settings::from_toml(&config).is_err());
    }

    #[test]
    fn test_rejects_unknown_transfer_source() {
        let config = format!(
            "{}\n[orchestrator]\ntransfer_source_chains = [2000]\n",
            SAMPLE
        );
        assert!(Settings::from_toml(&config).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}\n[orchestrator]\ntx_timeout_secs = 120\n", SAMPLE).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.orchestrator.tx_timeout(), Some(Duration::from_secs(120)));
    }
}
