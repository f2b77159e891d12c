//! Shared client handle and client construction.

use crate::collector::Collector;
use crate::error::InitError;
use apm_configuration::Configuration;
use std::fmt;
use std::sync::Arc;

/// Handle to an authenticated collector session.
///
/// Cloning is cheap and yields the same session; two clients are the same
/// session exactly when [`Client::ptr_eq`] holds.
#[derive(Clone)]
pub struct Client {
    collector: Arc<dyn Collector>,
    config: Arc<Configuration>,
}

impl Client {
    /// Creates a client owning the given collector.
    pub fn new<C: Collector>(collector: C, config: Configuration) -> Self {
        Self::from_shared(Arc::new(collector), config)
    }

    /// Creates a client around an already shared collector.
    ///
    /// Useful when the caller keeps its own handle to a concrete collector,
    /// such as a [`RecordingCollector`](crate::RecordingCollector) in tests.
    pub fn from_shared(collector: Arc<dyn Collector>, config: Configuration) -> Self {
        Self {
            collector,
            config: Arc::new(config),
        }
    }

    /// The collector behind this client.
    pub fn collector(&self) -> &dyn Collector {
        self.collector.as_ref()
    }

    /// The configuration this client was created from.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Returns true if both handles refer to the same session.
    pub fn ptr_eq(a: &Client, b: &Client) -> bool {
        Arc::ptr_eq(&a.collector, &b.collector)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("service_name", &self.config.service_name())
            .field("server_url", &self.config.server_url())
            .finish_non_exhaustive()
    }
}

/// Builds a [`Client`] from a resolved configuration.
///
/// Closures of the right shape implement this trait, which keeps test doubles
/// short:
///
/// ```
/// use apm_client::{Client, ClientFactory, InitError, RecordingCollector};
/// use apm_configuration::Configuration;
///
/// let factory = |config: &Configuration| -> Result<Client, InitError> {
///     Ok(Client::new(RecordingCollector::new(), config.clone()))
/// };
///
/// let config = Configuration::builder()
///     .service_name("svc")
///     .server_url("http://localhost:8200")
///     .build()
///     .unwrap();
/// assert!(factory.create(&config).is_ok());
/// ```
pub trait ClientFactory: Send + Sync {
    /// Creates a new client session.
    ///
    /// # Errors
    ///
    /// Returns an error if the collector client cannot be constructed.
    fn create(&self, config: &Configuration) -> Result<Client, InitError>;
}

impl<F> ClientFactory for F
where
    F: Fn(&Configuration) -> Result<Client, InitError> + Send + Sync,
{
    fn create(&self, config: &Configuration) -> Result<Client, InitError> {
        self(config)
    }
}
