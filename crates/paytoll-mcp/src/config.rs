use crate::paths::PaytollPaths;
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const DEFAULT_SECRET_ENV_VAR: &str = "PRIVATE_KEY";
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaytollConfig {
    /// Base URL of the paid API. Stored without a trailing slash.
    pub api_url: String,

    /// Refuse to start without a wallet instead of falling back to the free tier.
    pub require_wallet: bool,

    /// Informational; the server enforces the allowance.
    pub free_tier_daily_calls: Option<u32>,

    pub confirmation_timeout_secs: u64,

    pub secret: SecretConfig,

    pub rpc: RpcConfig,
}

impl Default for PaytollConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            require_wallet: false,
            free_tier_daily_calls: None,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            secret: SecretConfig::default(),
            rpc: RpcConfig::default(),
        }
    }
}

/// Inputs of the wallet secret resolution chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretConfig {
    pub env_var: String,
    /// macOS keychain item (`security find-generic-password`).
    pub keychain: Option<KeyRef>,
    /// Linux secret service item (`secret-tool lookup`).
    pub secret_service: Option<KeyRef>,
    /// Shell command whose stdout is the secret.
    pub command: Option<String>,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            env_var: DEFAULT_SECRET_ENV_VAR.to_owned(),
            keychain: None,
            secret_service: None,
            command: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub service: String,
    pub account: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Chain id (decimal string) -> RPC URL, replacing the built-in primary URL.
    pub urls: BTreeMap<String, String>,
}

/// CLI-level overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub require_wallet: bool,
}

fn is_truthy_env(v: &str) -> bool {
    matches!(v, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

fn normalize_api_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_owned()
}

impl PaytollConfig {
    /// Defaults, then `config.toml` (if any), then environment, then CLI overrides.
    pub fn load(paths: &PaytollPaths, overrides: &ConfigOverrides) -> eyre::Result<Self> {
        let mut cfg = Self::from_file(&paths.config_file())?;
        cfg.apply_env_overrides(|k| std::env::var(k).ok());
        cfg.apply_cli_overrides(overrides);
        Ok(cfg)
    }

    /// Missing file means defaults.
    pub fn from_file(path: &Path) -> eyre::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let s = fs::read_to_string(path).context("read config.toml")?;
        let mut cfg: Self = toml::from_str(&s).context("parse config.toml")?;
        cfg.api_url = normalize_api_url(&cfg.api_url);
        if cfg.confirmation_timeout_secs == 0 {
            tracing::warn!(
                default_secs = DEFAULT_CONFIRMATION_TIMEOUT_SECS,
                "config.toml confirmation_timeout_secs = 0 ignored"
            );
            cfg.confirmation_timeout_secs = DEFAULT_CONFIRMATION_TIMEOUT_SECS;
        }
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Only set, non-empty values count.
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = var("PAYTOLL_API_URL") {
            self.api_url = normalize_api_url(&v);
        }
        if let Some(v) = var("PAYTOLL_REQUIRE_WALLET") {
            self.require_wallet = is_truthy_env(&v);
        }
        if let Some(n) = var("PAYTOLL_FREE_TIER_DAILY_CALLS").and_then(|v| v.parse::<u32>().ok()) {
            self.free_tier_daily_calls = Some(n);
        }
        if let Some(n) =
            var("PAYTOLL_CONFIRMATION_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok())
        {
            if n > 0 {
                self.confirmation_timeout_secs = n;
            }
        }
        if let (Some(service), Some(account)) = (
            var("PAYTOLL_KEYCHAIN_SERVICE"),
            var("PAYTOLL_KEYCHAIN_ACCOUNT"),
        ) {
            self.secret.keychain = Some(KeyRef { service, account });
        }
        if let (Some(service), Some(account)) =
            (var("PAYTOLL_SECRET_SERVICE"), var("PAYTOLL_SECRET_ACCOUNT"))
        {
            self.secret.secret_service = Some(KeyRef { service, account });
        }
        if let Some(cmd) = var("PAYTOLL_SECRET_COMMAND") {
            self.secret.command = Some(cmd);
        }
    }

    pub fn apply_cli_overrides(&mut self, o: &ConfigOverrides) {
        if let Some(url) = &o.api_url {
            self.api_url = normalize_api_url(url);
        }
        if o.require_wallet {
            self.require_wallet = true;
        }
    }

    /// Zero never reaches the executor; it falls back to the default.
    pub fn confirmation_timeout(&self) -> std::time::Duration {
        let secs = match self.confirmation_timeout_secs {
            0 => DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            n => n,
        };
        std::time::Duration::from_secs(secs)
    }
}
