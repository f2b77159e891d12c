//! Error types for configuration resolution.

use thiserror::Error;

/// Errors that can occur while resolving configuration.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required option is absent or empty. Carries the environment variable name.
    #[error("{0} is required")]
    MissingRequiredField(&'static str),

    /// A configuration layer could not be read or parsed.
    #[error("failed to extract configuration")]
    Extract(#[source] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Extract(Box::new(err))
    }
}
