use crate::registry::{InvocationContext, ToolRegistry};
use serde::Serialize;
use serde_json::{json, Value};

pub const INFO_URI: &str = "paytoll://info";

const SERVICE_DESCRIPTION: &str =
    "Micro-payment API platform on x402 protocol. AI agents pay per call using stablecoins.";

/// Content of the `paytoll://info` resource.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: String,
    pub description: String,
    pub api_url: String,
    pub wallet_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_tier_daily_calls: Option<u32>,
    pub tool_count: usize,
}

impl ServiceInfo {
    pub fn new(
        service: &str,
        api_url: &str,
        wallet_address: Option<String>,
        free_tier_daily_calls: Option<u32>,
        tool_count: usize,
    ) -> Self {
        let name = if service.trim().is_empty() {
            "PayToll MCP Server".to_owned()
        } else {
            format!("{service} MCP Server")
        };
        Self {
            name,
            description: SERVICE_DESCRIPTION.to_owned(),
            api_url: api_url.to_owned(),
            wallet_mode: if wallet_address.is_some() {
                "paid"
            } else {
                "free_tier"
            },
            wallet_address,
            free_tier_daily_calls,
            tool_count,
        }
    }
}

/// Read-only state shared by every request handler.
pub struct ServerState {
    pub registry: ToolRegistry,
    pub ctx: InvocationContext,
    pub info: ServiceInfo,
}

impl ServerState {
    pub fn resources_list(&self) -> Value {
        json!({
            "resources": [{
                "uri": INFO_URI,
                "name": "info",
                "description": "Service, API URL and wallet mode of this server",
                "mimeType": "application/json"
            }]
        })
    }

    pub fn read_resource(&self, uri: &str) -> Option<Value> {
        if uri != INFO_URI {
            return None;
        }
        let text = serde_json::to_string(&self.info).ok()?;
        Some(json!({
            "contents": [{ "uri": INFO_URI, "mimeType": "application/json", "text": text }]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_reports_wallet_mode() -> eyre::Result<()> {
        let free = serde_json::to_value(ServiceInfo::new("PayToll", "http://x", None, Some(20), 3))?;
        assert_eq!(free.get("walletMode"), Some(&json!("free_tier")));
        assert_eq!(free.get("freeTierDailyCalls"), Some(&json!(20)));
        assert!(free.get("walletAddress").is_none());

        let paid = serde_json::to_value(ServiceInfo::new("", "http://x", Some("0xabc".into()), None, 0))?;
        assert_eq!(paid.get("walletMode"), Some(&json!("paid")));
        assert_eq!(paid.get("name"), Some(&json!("PayToll MCP Server")));
        Ok(())
    }
}
