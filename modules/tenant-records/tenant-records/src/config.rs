//! Session configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! environment variables prefixed with `TENANT_RECORDS__` (nested keys are
//! separated by `__`, e.g. `TENANT_RECORDS__FANOUT__MAX_IN_FLIGHT=4`).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use tenant_records_sdk::{AuthKind, TransportOptions};
use thiserror::Error;

use crate::domain::fanout::FanoutPolicy;

/// Prefix of environment variables read by [`SessionConfig::load`].
pub const ENV_PREFIX: &str = "TENANT_RECORDS__";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How tenants are addressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// One endpoint per tenant, discovered from the system service.
    #[default]
    MultiTenant,
    /// A single unscoped endpoint; tenant arguments are not accepted.
    SingleEndpoint,
}

/// Top-level session configuration.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Base URL all endpoint addresses are joined onto.
    pub base_url: String,

    pub username: Option<String>,

    #[serde(deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,

    pub auth: AuthKind,

    /// Proxy URL per scheme.
    pub proxy: BTreeMap<String, String>,

    /// Allow connectors to cache endpoint descriptions.
    pub cache: bool,

    pub mode: SessionMode,

    pub discovery: DiscoveryConfig,

    pub fanout: FanoutConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7047/DynamicsNAV/WS/".to_owned(),
            username: None,
            password: None,
            auth: AuthKind::default(),
            proxy: BTreeMap::new(),
            cache: true,
            mode: SessionMode::default(),
            discovery: DiscoveryConfig::default(),
            fanout: FanoutConfig::default(),
        }
    }
}

/// Tenant discovery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Query the system service for tenants. When disabled, `tenants` is used as-is.
    pub enabled: bool,

    /// Page of the system service, relative to the base URL.
    pub system_page: String,

    /// Operation listing the tenants.
    pub method: String,

    /// Static tenant list used when discovery is disabled.
    pub tenants: Vec<String>,

    /// Tenants never addressed, even when discovered.
    pub excluded: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            system_page: "SystemService".to_owned(),
            method: "Companies".to_owned(),
            tenants: Vec::new(),
            excluded: Vec::new(),
        }
    }
}

/// Fan-out limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FanoutConfig {
    /// Maximum tenant calls in flight at once.
    pub max_in_flight: usize,

    /// Deadline per tenant call, e.g. `30s`.
    #[serde(deserialize_with = "deserialize_duration")]
    pub call_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    /// Load configuration from defaults, an optional YAML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a source cannot be read or parsed and
    /// [`ConfigError::Invalid`] when the merged values are inconsistent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first inconsistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url must not be empty".to_owned()));
        }
        if self.fanout.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "fanout.max_in_flight must be at least 1".to_owned(),
            ));
        }
        if self.fanout.call_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "fanout.call_timeout must be positive".to_owned(),
            ));
        }
        if self.discovery.enabled && self.discovery.system_page.is_empty() {
            return Err(ConfigError::Invalid(
                "discovery.system_page must be set when discovery is enabled".to_owned(),
            ));
        }
        Ok(())
    }

    /// Options handed to the connector on every connect. Authentication is
    /// only requested when both username and password are set.
    #[must_use]
    pub fn transport_options(&self) -> TransportOptions {
        let has_credentials = self.username.is_some() && self.password.is_some();
        TransportOptions {
            auth: if has_credentials {
                self.auth
            } else {
                AuthKind::None
            },
            username: self.username.clone(),
            password: self
                .password
                .as_ref()
                .map(|secret| SecretString::from(secret.expose_secret().to_owned())),
            proxy: self.proxy.clone(),
            cache: self.cache,
        }
    }

    #[must_use]
    pub fn fanout_policy(&self) -> FanoutPolicy {
        FanoutPolicy {
            max_in_flight: self.fanout.max_in_flight.max(1),
            call_timeout: self.fanout.call_timeout,
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}
