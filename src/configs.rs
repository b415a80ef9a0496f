use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "pki-ledger.toml";
pub const CONFIG_PATH_ENV: &str = "PKI_LEDGER_CONFIG";

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub pki: PkiConfig,
    #[serde(default)]
    pub ca_defaults: CaDefaults,
    #[serde(default)]
    pub leaf_defaults: LeafDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PkiConfig {
    #[serde(default = "default_pki_root")]
    pub root: PathBuf,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            root: default_pki_root(),
        }
    }
}

fn default_pki_root() -> PathBuf {
    PathBuf::from("pki")
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CaDefaults {
    #[serde(default = "default_ca_cn")]
    pub common_name: String,
    #[serde(default = "default_ca_validity")]
    pub validity_days: u32,
}

impl Default for CaDefaults {
    fn default() -> Self {
        Self {
            common_name: default_ca_cn(),
            validity_days: default_ca_validity(),
        }
    }
}

fn default_ca_cn() -> String {
    "pki-ledger Root CA".to_string()
}

fn default_ca_validity() -> u32 {
    3650 // 10 years
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LeafDefaults {
    #[serde(default = "default_leaf_validity")]
    pub validity_days: u32,
}

impl Default for LeafDefaults {
    fn default() -> Self {
        Self {
            validity_days: default_leaf_validity(),
        }
    }
}

fn default_leaf_validity() -> u32 {
    365
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "pki_ledger=info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from `$PKI_LEDGER_CONFIG`, or from `pki-ledger.toml`
    /// if present, or fall back to the defaults.
    ///
    /// A path named by the environment variable must exist.
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Self::from_file(PathBuf::from(path));
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}
