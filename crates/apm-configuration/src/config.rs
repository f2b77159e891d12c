//! Validated instrumentation configuration and its raw, layered form.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Framework tag reported alongside every transaction.
pub const FRAMEWORK_NAME: &str = "frappe";

/// Framework version tag reported alongside every transaction.
pub const FRAMEWORK_VERSION: &str = "14+";

pub(crate) const SERVICE_NAME_VAR: &str = "ELASTIC_APM_SERVICE_NAME";
pub(crate) const SERVER_URL_VAR: &str = "ELASTIC_APM_SERVER_URL";

/// Parses an enable flag.
///
/// The recognised truthy spellings are `true`, `1`, `yes` and `on`, compared
/// case-insensitively after trimming. Anything else, including the empty
/// string, disables instrumentation.
///
/// ```
/// use apm_configuration::parse_enabled;
///
/// assert!(parse_enabled("YES"));
/// assert!(parse_enabled(" on "));
/// assert!(!parse_enabled("enabled"));
/// assert!(!parse_enabled(""));
/// ```
pub fn parse_enabled(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Immutable configuration needed to create a collector client.
///
/// A `Configuration` always has a non-empty service name and server URL;
/// the only ways to obtain one are [`ConfigResolver::resolve`] and
/// [`ConfigBuilder::build`], both of which validate.
///
/// [`ConfigResolver::resolve`]: crate::ConfigResolver::resolve
#[derive(Clone, PartialEq, Eq)]
pub struct Configuration {
    service_name: String,
    server_url: String,
    secret_token: Option<String>,
    environment: Option<String>,
    service_version: Option<String>,
    service_node_name: Option<String>,
}

impl Configuration {
    /// Creates a builder for programmatic construction.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Name identifying the service to the collector.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Collector endpoint.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Token used to authenticate against the collector.
    pub fn secret_token(&self) -> Option<&str> {
        self.secret_token.as_deref()
    }

    /// Deployment environment label.
    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    /// Service version label.
    pub fn service_version(&self) -> Option<&str> {
        self.service_version.as_deref()
    }

    /// Instance identity label.
    pub fn service_node_name(&self) -> Option<&str> {
        self.service_node_name.as_deref()
    }

    /// Fixed framework name tag.
    pub fn framework_name(&self) -> &'static str {
        FRAMEWORK_NAME
    }

    /// Fixed framework version tag.
    pub fn framework_version(&self) -> &'static str {
        FRAMEWORK_VERSION
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("service_name", &self.service_name)
            .field("server_url", &self.server_url)
            .field(
                "secret_token",
                &self.secret_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("environment", &self.environment)
            .field("service_version", &self.service_version)
            .field("service_node_name", &self.service_node_name)
            .field("framework_name", &FRAMEWORK_NAME)
            .field("framework_version", &FRAMEWORK_VERSION)
            .finish()
    }
}

/// Builder for constructing a [`Configuration`] programmatically.
#[must_use = "builders do nothing unless .build() is called"]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    raw: RawConfig,
}

impl ConfigBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name (required).
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.raw.service_name = Some(name.into());
        self
    }

    /// Sets the collector endpoint (required).
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.raw.server_url = Some(url.into());
        self
    }

    /// Sets the secret token.
    pub fn secret_token(mut self, token: impl Into<String>) -> Self {
        self.raw.secret_token = Some(token.into());
        self
    }

    /// Sets the deployment environment label.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.raw.environment = Some(environment.into());
        self
    }

    /// Sets the service version label.
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.raw.service_version = Some(version.into());
        self
    }

    /// Sets the instance identity label.
    pub fn service_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.raw.service_node_name = Some(node_name.into());
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequiredField`] when the service name or
    /// server URL is absent or empty.
    pub fn build(self) -> Result<Configuration, ConfigError> {
        self.raw.validate()
    }
}

/// Configuration as extracted from the figment layers, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct RawConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_node_name: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "enable_flag::deserialize"
    )]
    pub enabled: Option<bool>,
}

impl RawConfig {
    /// Whether instrumentation is enabled; unset means enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn validate(self) -> Result<Configuration, ConfigError> {
        let service_name =
            non_empty(self.service_name).ok_or(ConfigError::MissingRequiredField(SERVICE_NAME_VAR))?;
        let server_url =
            non_empty(self.server_url).ok_or(ConfigError::MissingRequiredField(SERVER_URL_VAR))?;

        Ok(Configuration {
            service_name,
            server_url,
            secret_token: non_empty(self.secret_token),
            environment: non_empty(self.environment),
            service_version: non_empty(self.service_version),
            service_node_name: non_empty(self.service_node_name),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Accepts the enable flag as a boolean, an integer or a truthy string.
mod enable_flag {
    use serde::Deserializer;
    use serde::de::{self, Visitor};
    use std::fmt;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(FlagVisitor)
    }

    struct FlagVisitor;

    impl<'de> Visitor<'de> for FlagVisitor {
        type Value = Option<bool>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a boolean or one of true/1/yes/on")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v == 1))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v == 1))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(super::parse_enabled(v)))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }
}
