//! Evolution API gateway client.
//!
//! Issues the two instance calls the reconnection flow needs, with the server
//! held API key attached. One request per call, no retries.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::client::{ClientError, GatewayState, QrPayload, ReconnectApi};
use crate::config::{ConfigError, GatewayConfig};
use crate::instance::InstanceId;

/// Gateway timeout for connection state checks
pub const CONNECTION_STATE_TIMEOUT: Duration = Duration::from_secs(15);

/// Gateway timeout for connect (QR generation) calls
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// The two gateway operations exposed through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ConnectionState,
    Connect,
}

impl Operation {
    /// Path segment on both the gateway (`/instance/{segment}/{id}`) and the
    /// proxy (`/api/{segment}`).
    pub fn path_segment(self) -> &'static str {
        match self {
            Operation::ConnectionState => "connectionState",
            Operation::Connect => "connect",
        }
    }

    pub fn default_timeout(self) -> Duration {
        match self {
            Operation::ConnectionState => CONNECTION_STATE_TIMEOUT,
            Operation::Connect => CONNECT_TIMEOUT,
        }
    }

    pub fn timeout_message(self) -> &'static str {
        match self {
            Operation::ConnectionState => "Tempo limite excedido ao verificar estado da conexão",
            Operation::Connect => "Tempo limite excedido ao conectar instância",
        }
    }

    pub fn internal_error_message(self) -> &'static str {
        match self {
            Operation::ConnectionState => "Erro interno ao verificar conexão",
            Operation::Connect => "Erro interno ao conectar instância",
        }
    }

    /// Generic message for a failed status code with no better description.
    pub fn status_message(self, status: u16) -> String {
        match self {
            Operation::ConnectionState => {
                format!("Erro ao verificar estado da conexão: {}", status)
            }
            Operation::Connect => format!("Erro ao conectar instância: {}", status),
        }
    }

    /// Fallback message for a gateway error response without an `error` field.
    pub fn gateway_error_message(self, status: u16) -> String {
        match status {
            404 => "Instância não encontrada".to_string(),
            401 | 403 => "Acesso não autorizado à API".to_string(),
            _ => self.status_message(status),
        }
    }
}

/// Errors from a single gateway call
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway responded with {status}")]
    Status {
        status: StatusCode,
        message: Option<String>,
    },

    #[error("gateway request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err)
        }
    }
}

/// A successful gateway response, relayed as-is by the proxy
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// HTTP client for the Evolution API
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    api_key: String,
    state_timeout: Duration,
    connect_timeout: Duration,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GatewayClient {
    /// Build a client from configuration. Both the base URL and the key are required.
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let (base_url, api_key) = config.require()?;
        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            state_timeout: CONNECTION_STATE_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    #[cfg(test)]
    pub fn with_timeouts(mut self, state_timeout: Duration, connect_timeout: Duration) -> Self {
        self.state_timeout = state_timeout;
        self.connect_timeout = connect_timeout;
        self
    }

    fn timeout_for(&self, op: Operation) -> Duration {
        match op {
            Operation::ConnectionState => self.state_timeout,
            Operation::Connect => self.connect_timeout,
        }
    }

    /// Issue one GET for `op` against the gateway.
    pub async fn fetch(
        &self,
        op: Operation,
        instance: &InstanceId,
    ) -> Result<GatewayResponse, GatewayError> {
        let url = format!(
            "{}/instance/{}/{}",
            self.base_url,
            op.path_segment(),
            urlencoding::encode(instance.as_str())
        );

        debug!("Gateway {} for instance {}", op.path_segment(), instance);

        let response = self
            .client
            .get(&url)
            .header("content-type", "application/json")
            .header("apikey", &self.api_key)
            .timeout(self.timeout_for(op))
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        if !status.is_success() {
            return Err(GatewayError::Status {
                status,
                message: extract_error_message(&body),
            });
        }

        Ok(GatewayResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Pull a human readable error out of a gateway error body.
///
/// Evolution API answers either `{"error": "..."}` or
/// `{"response": {"message": ["..."]}}`.
pub fn extract_error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;

    let from_message = |message: &Value| match message {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|m| m.as_str().map(str::to_string)),
        _ => None,
    };

    value
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| value.pointer("/response/message").and_then(from_message))
        .or_else(|| value.get("message").and_then(from_message))
        .filter(|m| !m.trim().is_empty())
}

impl GatewayError {
    /// Translate into the error the reconnection flow reports for `op`.
    pub fn into_client_error(self, op: Operation) -> ClientError {
        match self {
            GatewayError::Timeout => ClientError::Timeout,
            GatewayError::Status { status, .. } => ClientError::from_status(op, status.as_u16()),
            GatewayError::Transport(e) => ClientError::Transport(e.to_string()),
        }
    }
}

impl GatewayClient {
    async fn call(&self, op: Operation, instance: &str) -> Result<Value, ClientError> {
        let instance = InstanceId::parse(instance).ok_or(ClientError::MissingInstance)?;
        if !instance.is_strict() {
            return Err(ClientError::InvalidInstance);
        }

        let response = self
            .fetch(op, &instance)
            .await
            .map_err(|e| e.into_client_error(op))?;
        response.json().map_err(|e| ClientError::Parse(e.to_string()))
    }
}

/// Lets web-mode sessions drive the reconnection flow without a proxy hop.
#[async_trait]
impl ReconnectApi for GatewayClient {
    async fn connection_state(&self, instance: &str) -> Result<GatewayState, ClientError> {
        let body = self.call(Operation::ConnectionState, instance).await?;
        GatewayState::from_response(&body)
    }

    async fn connect(&self, instance: &str) -> Result<QrPayload, ClientError> {
        let body = self.call(Operation::Connect, instance).await?;
        QrPayload::from_response(body)
    }
}
