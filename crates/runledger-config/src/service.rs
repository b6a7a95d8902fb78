//! Service configuration: YAML file, environment overrides, validation.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use runledger_core::logging::runledger_home;
use runledger_core::{CoreError, Result};
use runledger_pricing::PricingConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Port used when neither the file nor `PORT` names one.
pub const DEFAULT_PORT: u16 = 3000;

/// Environment variable names read by [`ServiceConfig::apply_env`].
pub mod env {
    pub const PORT: &str = "PORT";
    pub const LISTEN_ADDR: &str = "RUNLEDGER_LISTEN_ADDR";
    pub const DATABASE: &str = "RUNLEDGER_DATABASE";
    pub const API_KEY: &str = "RUNS_SERVICE_API_KEY";
    pub const PRICING_URL: &str = "COSTS_SERVICE_URL";
    pub const PRICING_API_KEY: &str = "COSTS_SERVICE_API_KEY";
}

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the HTTP API binds to
    pub listen_addr: SocketAddr,

    /// SQLite database file
    pub database_path: PathBuf,

    /// Key callers must present as `X-API-Key`
    pub api_key: String,

    /// Pricing authority client settings
    pub pricing: PricingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            database_path: runledger_home().join("runledger.db"),
            api_key: String::new(),
            pricing: PricingConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load the full configuration.
    ///
    /// An explicit `path` must exist. Without one, `~/.runledger/config.yaml`
    /// is read when present and defaults are used otherwise. Environment
    /// overrides are applied last, then the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    debug!(path = %default_path.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env()?;
        config.validate()?;

        info!(
            listen_addr = %config.listen_addr,
            database = %config.database_path.display(),
            pricing_url = %config.pricing.base_url,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Read and parse a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::config_not_found_with_source(path, e)
            } else {
                CoreError::io("reading config", path, e)
            }
        })?;
        Self::parse(&content, path)
    }

    /// Parse YAML content; `path` is only used for error messages.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| CoreError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    ///
    /// `RUNLEDGER_LISTEN_ADDR` replaces the whole address; `PORT` then
    /// replaces only the port.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = get(env::LISTEN_ADDR) {
            self.listen_addr = addr.trim().parse().map_err(|_| {
                CoreError::config_validation(format!("{} is not a socket address: {addr}", env::LISTEN_ADDR))
            })?;
        }
        if let Some(port) = get(env::PORT) {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| CoreError::config_validation(format!("{} is not a port: {port}", env::PORT)))?;
            self.listen_addr.set_port(port);
        }
        if let Some(path) = get(env::DATABASE) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(key) = get(env::API_KEY) {
            self.api_key = key;
        }
        if let Some(url) = get(env::PRICING_URL) {
            self.pricing.base_url = url;
        }
        if let Some(key) = get(env::PRICING_API_KEY) {
            self.pricing.api_key = Some(key);
        }
        Ok(())
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(CoreError::ConfigMissingField {
                field: format!("api_key ({})", env::API_KEY),
            });
        }

        let url = self.pricing.base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CoreError::config_validation(format!(
                "pricing.base_url must be an http(s) URL, got '{url}'"
            )));
        }

        if self.pricing.timeout_secs == 0 {
            return Err(CoreError::config_validation("pricing.timeout_secs must be > 0"));
        }

        if self.pricing.base_delay_ms == 0 {
            return Err(CoreError::config_validation("pricing.base_delay_ms must be > 0"));
        }

        if self.pricing.max_delay_ms < self.pricing.base_delay_ms {
            return Err(CoreError::config_validation(format!(
                "pricing.max_delay_ms ({}) must be >= pricing.base_delay_ms ({})",
                self.pricing.max_delay_ms, self.pricing.base_delay_ms
            )));
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(CoreError::config_validation("database_path must not be empty"));
        }

        Ok(())
    }
}

/// Default config file location (`~/.runledger/config.yaml`).
pub fn config_path() -> PathBuf {
    runledger_home().join("config.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    fn valid() -> ServiceConfig {
        ServiceConfig {
            api_key: "secret".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.listen_addr.port(), DEFAULT_PORT);
        assert!(config.database_path.ends_with(".runledger/runledger.db"));
        assert_eq!(config.pricing, PricingConfig::default());
    }

    #[test]
    fn test_parse_partial_yaml_keeps_defaults() {
        let yaml = r#"
api_key: abc
pricing:
  base_url: http://localhost:9000
  max_retries: 5
"#;
        let config = ServiceConfig::parse(yaml, Path::new("config.yaml")).unwrap();
        assert_eq!(config.api_key, "abc");
        assert_eq!(config.pricing.base_url, "http://localhost:9000");
        assert_eq!(config.pricing.max_retries, 5);
        assert_eq!(config.pricing.timeout_secs, 10);
        assert_eq!(config.listen_addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = ServiceConfig::parse("listen_addr: [not, an, addr", Path::new("bad.yaml")).unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let config = ServiceConfig::parse("  \n", Path::new("empty.yaml")).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = ServiceConfig::default();
        config
            .apply_overrides(lookup(&[
                (env::LISTEN_ADDR, "127.0.0.1:8080"),
                (env::PORT, "9090"),
                (env::DATABASE, "/var/lib/runledger.db"),
                (env::API_KEY, "k1"),
                (env::PRICING_URL, "http://pricing.internal"),
                (env::PRICING_API_KEY, "k2"),
            ]))
            .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.database_path, PathBuf::from("/var/lib/runledger.db"));
        assert_eq!(config.api_key, "k1");
        assert_eq!(config.pricing.base_url, "http://pricing.internal");
        assert_eq!(config.pricing.api_key.as_deref(), Some("k2"));
    }

    #[test]
    fn test_empty_override_ignored() {
        let mut config = valid();
        config.apply_overrides(lookup(&[(env::API_KEY, "  ")])).unwrap();
        assert_eq!(config.api_key, "secret");
    }

    #[test]
    fn test_bad_port_rejected() {
        let mut config = ServiceConfig::default();
        let err = config.apply_overrides(lookup(&[(env::PORT, "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_validate_requires_api_key() {
        let err = ServiceConfig::default().validate().unwrap_err();
        assert!(matches!(err, CoreError::ConfigMissingField { .. }));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_pricing() {
        let mut config = valid();
        config.pricing.base_url = "ftp://prices".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.pricing.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.pricing.base_delay_ms = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.pricing.max_delay_ms = 10;
        assert!(config.validate().unwrap_err().to_string().contains("max_delay_ms"));
    }
}
