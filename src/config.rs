//! Node configuration
//!
//! Loaded from `<home>/config/config.toml`. The `[rpc]` table names the
//! consensus engine's RPC listen address; the `[ca]` table configures the
//! certificate authority service. Duration values accept `s`, `ms`, and `d`
//! suffixes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::csp::{CsProvider, Key, KeyOpts};
use crate::error::{DpkiError, Result};
use crate::x509::Template;

/// Top-level node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Consensus engine RPC settings
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Certificate authority settings
    #[serde(default)]
    pub ca: CaConfig,
}

impl NodeConfig {
    /// Load configuration from `<home>/config/config.toml`
    pub fn load(home: impl AsRef<Path>) -> Result<Self> {
        let path = home.as_ref().join("config").join("config.toml");
        let content = std::fs::read_to_string(&path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        if !self.rpc.laddr.contains("//") {
            return Err(DpkiError::ConfigInvalid(format!(
                "rpc.laddr `{}` must carry a scheme",
                self.rpc.laddr
            )));
        }
        self.ca.validate()
    }
}

/// Consensus engine RPC settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Listen address of the engine's RPC endpoint
    pub laddr: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            laddr: "tcp://127.0.0.1:26657".to_string(),
        }
    }
}

impl RpcConfig {
    /// HTTP base URL derived from `laddr`
    pub fn http_base_url(&self) -> String {
        match self.laddr.split_once("//") {
            Some((_, authority)) => format!("http://{authority}"),
            None => format!("http://{}", self.laddr),
        }
    }
}

/// Certificate authority settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaConfig {
    /// Path to the CA key file, relative to the node home; its presence
    /// makes the node an issuing CA
    pub ca_key_file: Option<PathBuf>,

    /// Template names the CA is willing to sign (`Node` aliases Host)
    #[serde(default = "default_allow_templates")]
    pub allow_templates: Vec<String>,

    /// Path length granted to downstream CA certificates whose request
    /// carries none
    #[serde(default = "default_next_path_length")]
    pub next_path_length: u32,

    /// Validity window for CA certificates
    #[serde(default = "default_ca_valid_for")]
    pub ca_valid_for: String,

    /// Validity window for Host certificates
    #[serde(default = "default_host_valid_for")]
    pub host_valid_for: String,

    /// Validity window for User certificates
    #[serde(default = "default_user_valid_for")]
    pub user_valid_for: String,

    /// Deference delay per hop granted to closer CAs before signing
    #[serde(default = "default_waiting_for_downstream")]
    pub waiting_for_downstream: String,
}

fn default_allow_templates() -> Vec<String> {
    vec!["CA".to_string(), "Host".to_string(), "User".to_string()]
}

fn default_next_path_length() -> u32 {
    3
}

fn default_ca_valid_for() -> String {
    "795d".to_string()
}

fn default_host_valid_for() -> String {
    "530d".to_string()
}

fn default_user_valid_for() -> String {
    "365d".to_string()
}

fn default_waiting_for_downstream() -> String {
    "900s".to_string()
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            ca_key_file: None,
            allow_templates: default_allow_templates(),
            next_path_length: default_next_path_length(),
            ca_valid_for: default_ca_valid_for(),
            host_valid_for: default_host_valid_for(),
            user_valid_for: default_user_valid_for(),
            waiting_for_downstream: default_waiting_for_downstream(),
        }
    }
}

impl CaConfig {
    /// Deference delay per hop
    pub fn waiting_for_downstream(&self) -> Result<Duration> {
        parse_duration(&self.waiting_for_downstream)
    }

    /// Validity in days for certificates of a template
    pub fn valid_for_days(&self, template: Template) -> Result<i64> {
        let src = match template {
            Template::Ca => &self.ca_valid_for,
            Template::Host => &self.host_valid_for,
            Template::User => &self.user_valid_for,
        };
        Ok((parse_duration(src)?.as_secs() / 86_400) as i64)
    }

    /// True when the CA signs requests of this template
    pub fn allows(&self, template: Template) -> bool {
        self.allow_templates
            .iter()
            .any(|name| Template::from_name(name) == Some(template))
    }

    fn validate(&self) -> Result<()> {
        for name in &self.allow_templates {
            if Template::from_name(name).is_none() {
                return Err(DpkiError::ConfigInvalid(format!(
                    "unknown template `{name}` in ca.allow_templates"
                )));
            }
        }
        for src in [
            &self.ca_valid_for,
            &self.host_valid_for,
            &self.user_valid_for,
            &self.waiting_for_downstream,
        ] {
            parse_duration(src)?;
        }
        Ok(())
    }
}

/// Parse a duration string: `NNNs`, `NNNms`, or `NNNd`
pub fn parse_duration(src: &str) -> Result<Duration> {
    let invalid = || DpkiError::ConfigInvalid(format!("cannot parse duration `{src}`"));
    if let Some(value) = src.strip_suffix("ms") {
        let millis: u64 = value.parse().map_err(|_| invalid())?;
        Ok(Duration::from_millis(millis))
    } else if let Some(value) = src.strip_suffix('s') {
        let secs: u64 = value.parse().map_err(|_| invalid())?;
        Ok(Duration::from_secs(secs))
    } else if let Some(value) = src.strip_suffix('d') {
        let days: u64 = value.parse().map_err(|_| invalid())?;
        Ok(Duration::from_secs(days * 86_400))
    } else {
        Err(invalid())
    }
}

#[derive(Deserialize)]
struct KeyFile {
    #[serde(rename = "type")]
    key_type: String,
    value: String,
}

/// Load an ed25519 key from a tendermint-style JSON key file
///
/// The file holds `{"type": "tendermint/PrivKeyEd25519", "value": base64}`;
/// the first 32 decoded bytes are the private seed.
pub fn load_key_file(path: impl AsRef<Path>) -> Result<Key> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let content = std::fs::read_to_string(path.as_ref())?;
    let key_file: KeyFile = serde_json::from_str(&content)?;
    if !key_file.key_type.starts_with("tendermint/PrivKey") {
        return Err(DpkiError::ConfigInvalid(format!(
            "unexpected key type `{}`",
            key_file.key_type
        )));
    }
    if !key_file.key_type.ends_with("Ed25519") {
        return Err(DpkiError::Unsupported(format!(
            "key loader for `{}`",
            key_file.key_type
        )));
    }
    let mut raw = STANDARD.decode(key_file.value.trim())?;
    let key = CsProvider::new().key_import(&raw, &KeyOpts::ed25519());
    raw.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_suffixes() {
        assert_eq!(parse_duration("900s").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("795d").unwrap(), Duration::from_secs(795 * 86_400));
        assert!(parse_duration("10m").is_err());
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.rpc.laddr, "tcp://127.0.0.1:26657");
        assert_eq!(config.ca.next_path_length, 3);
        assert_eq!(config.ca.waiting_for_downstream().unwrap(), Duration::from_secs(900));
        assert_eq!(config.ca.valid_for_days(Template::User).unwrap(), 365);
        assert_eq!(config.ca.valid_for_days(Template::Host).unwrap(), 530);
        assert!(config.ca.ca_key_file.is_none());
    }

    #[test]
    fn test_node_alias_allows_host() {
        let config = CaConfig {
            allow_templates: vec!["CA".to_string(), "Node".to_string(), "User".to_string()],
            ..CaConfig::default()
        };
        assert!(config.allows(Template::Host));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let parsed: NodeConfig = toml::from_str(
            r#"
            [rpc]
            laddr = "tcp://0.0.0.0:26657"

            [ca]
            ca_key_file = "config/priv_validator_key.json"
            waiting_for_downstream = "300s"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.rpc.http_base_url(), "http://0.0.0.0:26657");
        assert_eq!(
            parsed.ca.waiting_for_downstream().unwrap(),
            Duration::from_secs(300)
        );
        // untouched keys keep their defaults
        assert_eq!(parsed.ca.ca_valid_for, "795d");
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_unknown_template_rejected() {
        let config = CaConfig {
            allow_templates: vec!["Robot".to_string()],
            ..CaConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DpkiError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_key_file_roundtrip() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;

        let csp = CsProvider::new();
        let key = csp.key_gen(&KeyOpts::ed25519()).unwrap();
        let mut value = key.to_bytes();
        value.extend(key.public_bytes());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("priv_validator_key.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "type": "tendermint/PrivKeyEd25519",
                "value": STANDARD.encode(&value),
            })
            .to_string(),
        )
        .unwrap();

        let loaded = load_key_file(&path).unwrap();
        assert_eq!(loaded.public_bytes(), key.public_bytes());
    }

    #[test]
    fn test_key_file_rejects_other_curves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(
            &path,
            r#"{"type": "tendermint/PrivKeySecp256k1", "value": "AAAA"}"#,
        )
        .unwrap();
        assert!(matches!(
            load_key_file(&path),
            Err(DpkiError::Unsupported(_))
        ));
    }
}
