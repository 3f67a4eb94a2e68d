//! Runtime configuration, read from environment variables.

use std::env;

use anyhow::{Context, bail};

use crate::data_sources::{Credentials, VendorConfig};
use crate::dispatch::Templates;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 5000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:fiberwatch.db?mode=rwc";

/// Default vendor account code.
const DEFAULT_ACCOUNT: u32 = 1;

/// Everything needed to start the service.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,

    /// Root of the alert API, without the `/api/v2` suffix.
    pub api_base_url: String,

    /// Bearer token to start with; refreshed on the first `401` if stale.
    pub api_token: Option<String>,

    pub credentials: Credentials,
    pub vendor: VendorConfig,
    pub templates: Templates,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Variables
    ///
    /// - `FIBERWATCH_PORT` (default 5000), `FIBERWATCH_DATABASE_URL`
    /// - `BASE_URL_API`, `API_TOKEN` (optional)
    /// - `API_AUTH_URL`, `API_USER`, `API_PASS`
    /// - `HSM_URL`, `HSM_TOKEN`, `HSM_COOKIE`, `HSM_ACCOUNT` (default 1)
    /// - `HSM_ID_ENERGIA` (default 116), `HSM_ID_LOS` (default 114)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| {
            optional(name).with_context(|| format!("missing required environment variable {name}"))
        };
        let parsed = |name: &str, default| -> anyhow::Result<u32> {
            match optional(name) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("{name} must be a number, got {raw:?}")),
                None => Ok(default),
            }
        };

        let port = match optional("FIBERWATCH_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("FIBERWATCH_PORT must be a port number, got {raw:?}"))?,
            None => DEFAULT_PORT,
        };

        let defaults = Templates::default();
        let templates = Templates {
            power_loss: parsed("HSM_ID_ENERGIA", defaults.power_loss)?,
            signal_loss: parsed("HSM_ID_LOS", defaults.signal_loss)?,
        };
        if templates.power_loss == templates.signal_loss {
            bail!("HSM_ID_ENERGIA and HSM_ID_LOS must name different templates");
        }

        Ok(Self {
            port,
            database_url: optional("FIBERWATCH_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api_base_url: required("BASE_URL_API")?,
            api_token: optional("API_TOKEN"),
            credentials: Credentials {
                auth_url: required("API_AUTH_URL")?,
                username: required("API_USER")?,
                password: required("API_PASS")?,
            },
            vendor: VendorConfig {
                url: required("HSM_URL")?,
                token: required("HSM_TOKEN")?,
                cookie: optional("HSM_COOKIE").unwrap_or_default(),
                account: parsed("HSM_ACCOUNT", DEFAULT_ACCOUNT)?,
            },
            templates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("BASE_URL_API", "https://nms.example.net"),
            ("API_AUTH_URL", "https://nms.example.net/api/token/"),
            ("API_USER", "noc"),
            ("API_PASS", "secret"),
            ("HSM_URL", "https://gateway.example.net/hsm"),
            ("HSM_TOKEN", "vendor-token"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> anyhow::Result<Config> {
        Config::from_lookup(|name| env.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.database_url, "sqlite:fiberwatch.db?mode=rwc");
        assert_eq!(config.api_token, None);
        assert_eq!(config.templates.power_loss, 116);
        assert_eq!(config.templates.signal_loss, 114);
        assert_eq!(config.vendor.account, 1);
        assert_eq!(config.vendor.cookie, "");
    }

    #[test]
    fn test_overrides() {
        let mut env = base_env();
        env.insert("FIBERWATCH_PORT", "8080");
        env.insert("API_TOKEN", "seed");
        env.insert("HSM_ID_LOS", "200");

        let config = load(&env).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.api_token.as_deref(), Some("seed"));
        assert_eq!(config.templates.signal_loss, 200);
    }

    #[test]
    fn test_missing_required_variable() {
        let mut env = base_env();
        env.remove("HSM_URL");

        let err = load(&env).unwrap_err();

        assert!(err.to_string().contains("HSM_URL"));
    }

    #[test]
    fn test_invalid_number() {
        let mut env = base_env();
        env.insert("HSM_ID_ENERGIA", "energia");

        assert!(load(&env).is_err());
    }
}
