//! Verifier configuration
//!
//! One TOML file per deployment under test:
//!
//! ```toml
//! [rpc]
//! url = "http://127.0.0.1:8545"
//! timeout_secs = 30
//!
//! [deployment]
//! vault = "0x..."
//! strategy = "0x..."
//! variant = "aura_bal_staker"
//! # policy_file = "policies/custom.toml"
//!
//! [report]
//! show_unchanged = false
//! ```

use crate::verifier::address::Address;
use crate::verifier::error::{VerifierError, VerifierResult};
use crate::verifier::policy::HarvestPolicy;
use crate::verifier::variants::variant_by_name;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default)]
    pub rpc: RpcConfig,
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Endpoint; the command line / `HARVEST_RPC_URL` takes precedence.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub vault: Address,
    pub strategy: Address,
    /// Built-in variant name, used when no policy file is given.
    #[serde(default)]
    pub variant: Option<String>,
    /// Custom policy TOML, relative to the config file.
    #[serde(default)]
    pub policy_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub show_unchanged: bool,
}

impl VerifierConfig {
    /// Load from TOML file. Relative policy paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> VerifierResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VerifierError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&contents)?;
        if let Some(ref policy) = config.deployment.policy_file {
            if policy.is_relative() {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                config.deployment.policy_file = Some(base.join(policy));
            }
        }
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> VerifierResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| VerifierError::config(format!("invalid config: {}", e)))?;
        if config.deployment.variant.is_none() && config.deployment.policy_file.is_none() {
            return Err(VerifierError::config(
                "deployment needs either `variant` or `policy_file`",
            ));
        }
        Ok(config)
    }

    /// The policy this deployment is verified against. A policy file wins over
    /// the variant name.
    pub fn policy(&self) -> VerifierResult<HarvestPolicy> {
        if let Some(ref path) = self.deployment.policy_file {
            let text = std::fs::read_to_string(path).map_err(|e| {
                VerifierError::config(format!("cannot read policy {}: {}", path.display(), e))
            })?;
            return HarvestPolicy::from_toml(&text);
        }
        let name = self.deployment.variant.as_deref().unwrap_or_default();
        variant_by_name(name).map_err(VerifierError::config)
    }

    /// RPC endpoint, preferring an explicit override.
    pub fn rpc_url(&self, override_url: Option<&str>) -> VerifierResult<String> {
        override_url
            .map(str::to_string)
            .or_else(|| self.rpc.url.clone())
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| VerifierError::config("no RPC url configured (set [rpc] url or HARVEST_RPC_URL)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[rpc]
url = "http://127.0.0.1:8545"

[deployment]
vault = "0x00000000000000000000000000000000000000A1"
strategy = "0x00000000000000000000000000000000000000a2"
variant = "aura_bal_staker"
"#;

    #[test]
    fn test_defaults_and_normalised_addresses() {
        let config = VerifierConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.rpc.timeout_secs, 30);
        assert!(!config.report.show_unchanged);
        assert_eq!(
            config.deployment.vault.as_str(),
            "0x00000000000000000000000000000000000000a1"
        );
        assert_eq!(config.policy().unwrap().name, "aura_bal_staker");
    }

    #[test]
    fn test_rpc_url_override_wins() {
        let config = VerifierConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.rpc_url(Some("http://node:8545")).unwrap(), "http://node:8545");
        assert_eq!(config.rpc_url(None).unwrap(), "http://127.0.0.1:8545");
    }

    #[test]
    fn test_missing_policy_source_rejected() {
        let text = SAMPLE.replace("variant = \"aura_bal_staker\"", "");
        assert!(matches!(
            VerifierConfig::from_toml(&text),
            Err(VerifierError::Config { .. })
        ));
    }

    #[test]
    fn test_unknown_variant_is_config_error() {
        let text = SAMPLE.replace("aura_bal_staker", "mystery");
        let config = VerifierConfig::from_toml(&text).unwrap();
        match config.policy() {
            Err(VerifierError::Config { reason }) => assert!(reason.contains("mystery")),
            other => panic!("unexpected: {:?}", other.map(|p| p.name)),
        }
    }
}
