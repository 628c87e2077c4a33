use crate::schema::InputSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `GET /v1/meta?detailed=true`.
///
/// Parsed field by field: an endpoint entry that does not decode is skipped with a warning,
/// and informational fields of the wrong type read as absent.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub service: String,
    pub version: String,
    pub x402: Option<PaymentSchemeInfo>,
    pub plugin_count: Option<u64>,
    pub endpoints: Vec<EndpointDescriptor>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentSchemeInfo {
    pub scheme: String,
    pub networks: Vec<String>,
    pub facilitator: String,
}

fn str_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_default()
}

fn strings(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

impl PaymentSchemeInfo {
    fn from_value(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        let networks = obj
            .get("networks")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|n| match n {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(o) => o
                            .get("network")
                            .or_else(|| o.get("name"))
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            scheme: str_field(obj, "scheme"),
            networks,
            facilitator: str_field(obj, "facilitator"),
        })
    }
}

impl Metadata {
    pub fn from_value(v: &Value) -> Self {
        let Some(obj) = v.as_object() else {
            tracing::warn!("metadata body is not a JSON object");
            return Self::default();
        };
        let endpoints = obj
            .get("endpoints")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .enumerate()
                    .filter_map(|(index, raw)| {
                        serde_json::from_value::<EndpointDescriptor>(raw.clone())
                            .map_err(|e| {
                                tracing::warn!(
                                    index,
                                    name = raw.get("name").and_then(serde_json::Value::as_str).unwrap_or("?"),
                                    error = %e,
                                    "skipping malformed endpoint"
                                );
                            })
                            .ok()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            service: str_field(obj, "service"),
            version: str_field(obj, "version"),
            x402: obj.get("x402").and_then(PaymentSchemeInfo::from_value),
            plugin_count: obj.get("pluginCount").and_then(Value::as_u64),
            endpoints,
            categories: strings(obj.get("categories")),
        }
    }
}

/// One priced endpoint. `name` is the tool name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    pub name: String,
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

fn default_method() -> String {
    "POST".to_owned()
}

impl EndpointDescriptor {
    /// `None` when the endpoint has no schema with `properties`.
    pub fn usable_schema(&self) -> Option<InputSchema> {
        self.input_schema.as_ref().and_then(InputSchema::from_value)
    }

    /// Description shown to the agent: the endpoint text with its price.
    pub fn tool_description(&self) -> String {
        format!("{} (Price: {})", self.description, self.price)
    }
}
