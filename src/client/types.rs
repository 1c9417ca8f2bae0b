//! Normalized gateway payloads.
//!
//! The gateway has answered with several shapes over time (`state` nested under
//! `instance` or flat, QR under `qr` or `base64`). Everything is resolved here
//! so the flow only sees one type per call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ClientError;

/// Session state as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayState {
    Open,
    Close,
    Connecting,
    Unknown(String),
}

impl From<&str> for GatewayState {
    fn from(raw: &str) -> Self {
        match raw {
            "open" => GatewayState::Open,
            "close" => GatewayState::Close,
            "connecting" => GatewayState::Connecting,
            other => GatewayState::Unknown(other.to_string()),
        }
    }
}

impl GatewayState {
    /// Read the state from a `connectionState` body.
    pub fn from_response(body: &Value) -> Result<Self, ClientError> {
        body.pointer("/instance/state")
            .and_then(Value::as_str)
            .or_else(|| body.get("state").and_then(Value::as_str))
            .map(GatewayState::from)
            .ok_or_else(|| ClientError::UnexpectedState(preview(body)))
    }
}

/// The most recent pairing code handed out by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    /// Raw QR text or base64 image data
    pub data: String,
    /// Raw QR text when the gateway sends it alongside an image
    pub code: Option<String>,
    pub pairing_code: Option<String>,
    pub count: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
    qr: Option<String>,
    base64: Option<String>,
    code: Option<String>,
    pairing_code: Option<String>,
    count: Option<u64>,
}

fn filled(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl QrPayload {
    /// Build a payload from a `connect` body. A body without `qr` or `base64` is an error.
    pub fn from_response(body: Value) -> Result<Self, ClientError> {
        let raw: ConnectResponse =
            serde_json::from_value(body).map_err(|e| ClientError::Parse(e.to_string()))?;

        let data = filled(raw.qr)
            .or_else(|| filled(raw.base64))
            .ok_or(ClientError::MissingQr)?;

        Ok(Self {
            data,
            code: filled(raw.code),
            pairing_code: filled(raw.pairing_code),
            count: raw.count,
        })
    }

    pub fn is_image(&self) -> bool {
        self.data.starts_with("data:")
    }

    /// Image source for the page: data URIs pass through, bare base64 is assumed PNG.
    pub fn data_uri(&self) -> String {
        if self.is_image() {
            self.data.clone()
        } else {
            format!("data:image/png;base64,{}", self.data)
        }
    }

    /// Text that can be re-encoded as a QR code in a terminal.
    pub fn scannable_text(&self) -> Option<&str> {
        self.code
            .as_deref()
            .or_else(|| (!self.is_image()).then_some(self.data.as_str()))
    }
}

fn preview(body: &Value) -> String {
    let text = body.to_string();
    if text.chars().count() > 80 {
        format!("{}...", text.chars().take(80).collect::<String>())
    } else {
        text
    }
}
