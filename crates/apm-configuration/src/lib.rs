//! Configuration for request transaction instrumentation.
//!
//! This crate resolves the settings needed to connect to a telemetry
//! collector and decides whether instrumentation is enabled at all. Values are
//! layered with [figment](https://docs.rs/figment), later sources overriding
//! earlier ones:
//!
//! 1. Compiled defaults
//! 2. An optional TOML file ([`ConfigResolver::with_file`])
//! 3. `ELASTIC_APM_*` environment variables
//! 4. Programmatic overrides ([`ConfigResolver::with_overrides`])
//!
//! # Example
//!
//! ```no_run
//! use apm_configuration::{ConfigResolver, ConfigError};
//!
//! fn main() -> Result<(), ConfigError> {
//!     let resolver = ConfigResolver::new();
//!
//!     if resolver.is_enabled() {
//!         let config = resolver.resolve()?;
//!         println!("reporting {} to {}", config.service_name(), config.server_url());
//!     }
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod logging;
mod resolver;

pub use config::{ConfigBuilder, Configuration, FRAMEWORK_NAME, FRAMEWORK_VERSION, parse_enabled};
pub use error::ConfigError;
pub use logging::init_tracing;
pub use resolver::{ConfigResolver, ENV_PREFIX};

// Re-export figment so callers can build override layers without a direct dependency
pub use figment;
