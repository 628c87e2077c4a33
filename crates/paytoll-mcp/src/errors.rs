use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A structured error suitable for returning to an MCP client as tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub data: Value,
}

impl ToolError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Error, Clone)]
pub enum PaytollError {
    /// Missing or malformed startup configuration (secret, platform, URL).
    #[error("configuration error: {0}")]
    Config(String),

    /// Non-success HTTP status from a request that has no richer error body (metadata fetch).
    #[error("{context}: {status} {status_text}")]
    Transport {
        context: &'static str,
        status: u16,
        status_text: String,
    },

    /// The request never produced an HTTP response.
    #[error("network error: {0}")]
    Network(String),

    #[error(
        "payment required: the API returned HTTP 402 and no wallet is configured. \
         Free-tier calls may be exhausted; configure PRIVATE_KEY (or keychain/secret service/command settings) to pay per call."
    )]
    PaymentRequiredNoWallet,

    #[error(
        "{tool} requires wallet context. Configure PRIVATE_KEY (or keychain/secret service/command settings)."
    )]
    WalletRequired { tool: String },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The payment signer could not satisfy a 402 challenge.
    #[error("payment failed: {0}")]
    Payment(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<PaytollError> for ToolError {
    fn from(e: PaytollError) -> Self {
        let code = match &e {
            PaytollError::Config(_) => "config_error",
            PaytollError::Transport { .. } => "transport_error",
            PaytollError::Network(_) => "network_error",
            PaytollError::PaymentRequiredNoWallet => "payment_required",
            PaytollError::WalletRequired { .. } => "wallet_required",
            PaytollError::Api { .. } => "api_error",
            PaytollError::InvalidParams(_) => "invalid_params",
            PaytollError::Payment(_) => "payment_error",
            PaytollError::Decode(_) => "decode_error",
        };
        let data = match &e {
            PaytollError::Api { status, .. } | PaytollError::Transport { status, .. } => {
                serde_json::json!({ "status": status })
            }
            _ => Value::Null,
        };
        Self::new(code, e.to_string()).with_data(data)
    }
}

impl From<reqwest::Error> for PaytollError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_required_is_distinct_from_api_error() {
        let paid = ToolError::from(PaytollError::PaymentRequiredNoWallet);
        let api = ToolError::from(PaytollError::Api {
            status: 500,
            message: "boom".into(),
        });
        assert_eq!(paid.code, "payment_required");
        assert_eq!(api.code, "api_error");
        assert!(paid.message.contains("no wallet"), "{}", paid.message);
        assert_eq!(api.message, "API error 500: boom");
        assert_eq!(api.data, serde_json::json!({ "status": 500 }));
    }

    #[test]
    fn transport_error_surfaces_status_and_text() {
        let e = PaytollError::Transport {
            context: "failed to fetch metadata",
            status: 503,
            status_text: "Service Unavailable".into(),
        };
        assert_eq!(
            e.to_string(),
            "failed to fetch metadata: 503 Service Unavailable"
        );
    }
}
