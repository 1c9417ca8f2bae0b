//! Client side of the reconnection flow.
//!
//! `ReconnectApi` is the seam the state machine talks to. `ProxyClient` reaches
//! it over HTTP through the proxy; the gateway client implements it directly.

mod error;
mod proxy_client;
mod types;

use async_trait::async_trait;

pub use error::ClientError;
pub use proxy_client::ProxyClient;
pub use types::{GatewayState, QrPayload};

/// The two calls the reconnection flow makes
#[async_trait]
pub trait ReconnectApi: Send + Sync {
    /// Current session state of `instance`
    async fn connection_state(&self, instance: &str) -> Result<GatewayState, ClientError>;

    /// Ask the gateway for a fresh pairing QR code
    async fn connect(&self, instance: &str) -> Result<QrPayload, ClientError>;
}
