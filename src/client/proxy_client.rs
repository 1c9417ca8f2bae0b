//! HTTP client for the reconnection proxy.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ClientError, GatewayState, QrPayload, ReconnectApi};
use crate::gateway::Operation;
use crate::instance::InstanceId;

/// Talks to `/api/connectionState` and `/api/connect` on a running proxy.
///
/// Timeouts mirror the proxy's own gateway timeouts so a slow gateway surfaces
/// as the proxy's 504 rather than a local abort.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: Client,
    base_url: String,
    state_timeout: Duration,
    connect_timeout: Duration,
}

impl ProxyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            state_timeout: Operation::ConnectionState.default_timeout(),
            connect_timeout: Operation::Connect.default_timeout(),
        }
    }

    #[cfg(test)]
    pub fn with_timeouts(mut self, state_timeout: Duration, connect_timeout: Duration) -> Self {
        self.state_timeout = state_timeout;
        self.connect_timeout = connect_timeout;
        self
    }

    async fn get(&self, op: Operation, instance: &str) -> Result<Value, ClientError> {
        let instance = InstanceId::parse(instance).ok_or(ClientError::MissingInstance)?;
        let url = format!("{}/api/{}", self.base_url, op.path_segment());
        let timeout = match op {
            Operation::ConnectionState => self.state_timeout,
            Operation::Connect => self.connect_timeout,
        };

        let response = self
            .client
            .get(&url)
            .query(&[("instance", instance.as_str())])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                warn!("Proxy {} request failed: {}", op.path_segment(), e);
                ClientError::from_reqwest(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Proxy {} returned {}", op.path_segment(), status);
            return Err(ClientError::from_status(op, status.as_u16()));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(ClientError::from_reqwest)?;
        debug!("Proxy {} response: {}", op.path_segment(), body);
        Ok(body)
    }
}

#[async_trait]
impl ReconnectApi for ProxyClient {
    async fn connection_state(&self, instance: &str) -> Result<GatewayState, ClientError> {
        let body = self.get(Operation::ConnectionState, instance).await?;
        GatewayState::from_response(&body)
    }

    async fn connect(&self, instance: &str) -> Result<QrPayload, ClientError> {
        let body = self.get(Operation::Connect, instance).await?;
        QrPayload::from_response(body)
    }
}
