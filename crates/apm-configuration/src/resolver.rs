//! Layered configuration resolution.
//!
//! The resolver rebuilds its figment on every call, so environment changes made
//! after process start (for example by a host that exports variables late in
//! its boot sequence) are picked up by the next resolution.
//!
//! # Supported Environment Variables
//!
//! | Variable | Required | Description |
//! |----------|----------|-------------|
//! | `ELASTIC_APM_SERVICE_NAME` | yes | Service identity |
//! | `ELASTIC_APM_SERVER_URL` | yes | Collector endpoint |
//! | `ELASTIC_APM_SECRET_TOKEN` | no | Collector authentication |
//! | `ELASTIC_APM_ENVIRONMENT` | no | Deployment environment label |
//! | `ELASTIC_APM_SERVICE_VERSION` | no | Version label |
//! | `ELASTIC_APM_SERVICE_NODE_NAME` | no | Instance identity label |
//! | `ELASTIC_APM_ENABLED` | no | `true`/`1`/`yes`/`on` enable, anything else disables |

use crate::config::{Configuration, RawConfig};
use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Prefix shared by all recognised environment variables.
pub const ENV_PREFIX: &str = "ELASTIC_APM_";

/// Resolves [`Configuration`] from layered sources.
///
/// Resolution has no side effects; it only reads the configured sources.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    file: Option<PathBuf>,
    overrides: Option<Figment>,
    read_env: bool,
}

impl ConfigResolver {
    /// Creates a resolver reading defaults and the process environment.
    pub fn new() -> Self {
        Self {
            file: None,
            overrides: None,
            read_env: true,
        }
    }

    /// Layers a TOML file between the defaults and the environment.
    ///
    /// A missing file is skipped; a malformed one fails resolution.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Layers programmatic overrides on top of every other source.
    pub fn with_overrides(mut self, figment: Figment) -> Self {
        self.overrides = Some(figment);
        self
    }

    /// Stops the resolver from reading `ELASTIC_APM_*` variables.
    pub fn without_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    /// Builds the figment for the current state of all sources.
    pub fn figment(&self) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(RawConfig::default()));

        let file = self.file.as_deref().filter(|path| path.exists());
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        } else if let Some(path) = &self.file {
            tracing::debug!(
                target: "apm_lifecycle",
                path = %path.display(),
                "Configuration file not found, skipping"
            );
        }

        if self.read_env {
            figment = figment.merge(elastic_apm_env());
        }

        if let Some(overrides) = &self.overrides {
            figment = figment.merge(overrides.clone());
        }

        tracing::debug!(
            target: "apm_lifecycle",
            file = ?file,
            env = self.read_env,
            overrides = self.overrides.is_some(),
            "Configuration layers merged"
        );

        figment
    }

    /// Returns whether instrumentation is enabled.
    ///
    /// Defaults to enabled when the flag is unset. If the sources cannot be
    /// read this also reports enabled, so the failure surfaces from
    /// [`resolve`](Self::resolve) instead of silently disabling telemetry.
    pub fn is_enabled(&self) -> bool {
        self.raw().map(|raw| raw.is_enabled()).unwrap_or(true)
    }

    /// Resolves and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequiredField`] if the service name or
    /// server URL is absent, or [`ConfigError::Extract`] if a source is
    /// malformed.
    pub fn resolve(&self) -> Result<Configuration, ConfigError> {
        self.raw()?.validate()
    }

    fn raw(&self) -> Result<RawConfig, ConfigError> {
        Ok(self.figment().extract()?)
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Partial config for `ELASTIC_APM_*` overrides.
///
/// Values are carried as strings so versions like `1.0` are not coerced into
/// numbers.
#[derive(Debug, Default, Serialize)]
struct EnvConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_node_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<String>,
}

fn elastic_apm_env() -> Serialized<EnvConfig> {
    let var = |name: &str| std::env::var(format!("{ENV_PREFIX}{name}")).ok();

    let config = EnvConfig {
        service_name: var("SERVICE_NAME"),
        server_url: var("SERVER_URL"),
        secret_token: var("SECRET_TOKEN"),
        environment: var("ENVIRONMENT"),
        service_version: var("SERVICE_VERSION"),
        service_node_name: var("SERVICE_NODE_NAME"),
        enabled: var("ENABLED"),
    };

    Serialized::defaults(config)
}
