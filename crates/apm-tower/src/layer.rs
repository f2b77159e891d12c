//! Tower layer that adds transaction reporting to handlers.

use crate::service::ApmService;
use apm_client::Client;
use tower::Layer;

/// Tower layer that wraps a [`Handler`](crate::Handler) in an [`ApmService`].
///
/// Every service produced by the layer reports through the same client.
///
/// # Example
///
/// ```
/// use apm_client::{Client, RecordingCollector};
/// use apm_configuration::Configuration;
/// use apm_tower::{ApmLayer, Handler, ResponseBody, handler_fn};
/// use tower::Layer;
///
/// let config = Configuration::builder()
///     .service_name("erpnext")
///     .server_url("http://apm-server:8200")
///     .build()
///     .unwrap();
/// let layer = ApmLayer::new(Client::new(RecordingCollector::new(), config));
///
/// let service = layer.layer(handler_fn(|_, _| Ok(ResponseBody::empty())));
/// assert!(service.is_instrumented());
/// ```
#[derive(Clone, Debug)]
pub struct ApmLayer {
    client: Client,
}

impl ApmLayer {
    /// Creates a layer reporting through `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The client this layer reports through.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl<H> Layer<H> for ApmLayer {
    type Service = ApmService<H>;

    fn layer(&self, inner: H) -> Self::Service {
        ApmService::new(inner, self.client.clone())
    }
}
