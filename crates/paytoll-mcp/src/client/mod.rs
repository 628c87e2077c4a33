//! HTTP access to the paid API: metadata discovery and per-endpoint calls.

mod meta;
pub mod payment;

pub use meta::{EndpointDescriptor, Metadata};
pub use payment::{ExactEvmPayer, PaymentChallenge, PaymentHeader, PaymentSigner};

use crate::errors::PaytollError;
use reqwest::{Method, Response, StatusCode};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one API base URL. With a payer, HTTP 402 responses are paid and retried once;
/// without one, calls go out on the free tier.
#[derive(Clone)]
pub struct PaytollClient {
    api_url: String,
    http: reqwest::Client,
    payer: Option<Arc<dyn PaymentSigner>>,
}

impl std::fmt::Debug for PaytollClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaytollClient")
            .field("api_url", &self.api_url)
            .field("paid", &self.payer.is_some())
            .finish_non_exhaustive()
    }
}

/// Text of a failed call: the JSON body's `error` field if any, else the body itself.
fn api_error_message(body: &str) -> String {
    let Ok(v) = serde_json::from_str::<Value>(body) else {
        return body.to_owned();
    };
    match v.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => v.to_string(),
    }
}

/// Non-string parameters are sent as their JSON text.
fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), s)
        })
        .collect()
}

impl PaytollClient {
    pub fn new(
        api_url: &str,
        payer: Option<Arc<dyn PaymentSigner>>,
    ) -> Result<Self, PaytollError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .user_agent(concat!("paytoll-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PaytollError::Config(format!("build http client: {e}")))?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_owned(),
            http,
            payer,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn is_paid(&self) -> bool {
        self.payer.is_some()
    }

    pub async fn fetch_meta(&self) -> Result<Metadata, PaytollError> {
        let url = format!("{}/v1/meta?detailed=true", self.api_url);
        tracing::info!(%url, "fetching metadata");
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PaytollError::Transport {
                context: "failed to fetch metadata",
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_owned(),
            });
        }
        let body = resp
            .json::<Value>()
            .await
            .map_err(|e| PaytollError::Decode(format!("metadata: {e}")))?;
        Ok(Metadata::from_value(&body))
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        params: &Map<String, Value>,
        payment: Option<&PaymentHeader>,
    ) -> Result<Response, PaytollError> {
        let mut req = self.http.request(method.clone(), url);
        req = if *method == Method::GET || *method == Method::HEAD {
            req.query(&query_pairs(params))
        } else {
            req.json(params)
        };
        if let Some(h) = payment {
            req = req.header(h.name, &h.value);
        }
        Ok(req.send().await?)
    }

    /// Call one endpoint with a JSON body (query string for GET/HEAD).
    pub async fn call_endpoint(
        &self,
        path: &str,
        method: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, PaytollError> {
        let method = Method::from_bytes(method.trim().to_uppercase().as_bytes())
            .map_err(|e| PaytollError::Decode(format!("invalid HTTP method `{method}`: {e}")))?;
        let url = format!("{}{path}", self.api_url);

        let mut resp = self.send(&method, &url, params, None).await?;
        if resp.status() == StatusCode::PAYMENT_REQUIRED {
            let Some(payer) = &self.payer else {
                return Err(PaytollError::PaymentRequiredNoWallet);
            };
            let required = resp
                .headers()
                .get(payment::PAYMENT_REQUIRED_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let challenge = PaymentChallenge::from_response(required.as_deref(), body);
            let header = payer.payment_header(&challenge).await?;
            tracing::debug!(%url, "retrying with payment");
            resp = self.send(&method, &url, params, Some(&header)).await?;
        }

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(PaytollError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| PaytollError::Decode(format!("response from {path} is not JSON: {e}")))
    }
}
