//! One MCP tool per discovered endpoint, and the handler that runs a call end to end.

use crate::client::{EndpointDescriptor, Metadata, PaytollClient};
use crate::errors::{PaytollError, ToolError};
use crate::executor::TxExecutor;
use crate::rpc::{tool_err, tool_ok};
use crate::schema::{translate, InputSchema, ParamShape};
use crate::wallet::WalletIdentity;
use crate::wallet_fields::{
    declared_hidden_fields, enrich_params, schema_visible_to_caller, WALLET_INJECTED_FIELDS,
};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct EndpointTool {
    endpoint: EndpointDescriptor,
    /// Schema as the server declared it, hidden fields included.
    declared: InputSchema,
    /// Validator for what the agent may send.
    shape: ParamShape,
    description: String,
}

impl EndpointTool {
    /// `None` when the endpoint carries no usable input schema.
    pub fn from_endpoint(endpoint: EndpointDescriptor) -> Option<Self> {
        let declared = endpoint.usable_schema()?;
        let visible = schema_visible_to_caller(&declared, WALLET_INJECTED_FIELDS);
        let shape = translate(&visible);
        let description = endpoint.tool_description();
        Some(Self {
            endpoint,
            declared,
            shape,
            description,
        })
    }

    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub const fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    pub const fn shape(&self) -> &ParamShape {
        &self.shape
    }

    pub fn wallet_injected(&self) -> bool {
        !declared_hidden_fields(&self.declared, WALLET_INJECTED_FIELDS).is_empty()
    }

    /// `tools/list` entry.
    pub fn descriptor(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "inputSchema": self.shape().to_json_schema(),
        })
    }
}

/// Tools in registration order. A repeated name replaces the earlier tool in place.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<EndpointTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn from_endpoints(endpoints: impl IntoIterator<Item = EndpointDescriptor>) -> Self {
        let mut reg = Self::default();
        for endpoint in endpoints {
            let name = endpoint.name.clone();
            let Some(tool) = EndpointTool::from_endpoint(endpoint) else {
                tracing::info!(tool = %name, "skipping endpoint without input schema");
                continue;
            };
            tracing::info!(
                tool = %name,
                method = %tool.endpoint().method,
                path = %tool.endpoint().path,
                takes_params = !tool.shape().is_empty(),
                wallet_inject = tool.wallet_injected(),
                "registered tool"
            );
            reg.insert(tool);
        }
        reg
    }

    fn insert(&mut self, tool: EndpointTool) {
        if let Some(&at) = self.index.get(tool.name()) {
            tracing::warn!(tool = %tool.name(), "duplicate endpoint name; later definition wins");
            if let Some(slot) = self.tools.get_mut(at) {
                *slot = tool;
            }
            return;
        }
        self.index.insert(tool.name().to_owned(), self.tools.len());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&EndpointTool> {
        self.index.get(name).and_then(|&i| self.tools.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointTool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn list_tools_result(&self) -> Value {
        json!({ "tools": self.iter().map(EndpointTool::descriptor).collect::<Vec<_>>() })
    }
}

/// Fetch metadata once and build the registry from it.
pub async fn register_all(
    client: &PaytollClient,
    wallet: Option<&WalletIdentity>,
) -> Result<(Metadata, ToolRegistry), PaytollError> {
    let meta = client.fetch_meta().await?;
    tracing::info!(
        service = %meta.service,
        version = %meta.version,
        plugins = ?meta.plugin_count,
        categories = meta.categories.len(),
        endpoints = meta.endpoints.len(),
        "fetched metadata"
    );
    match wallet {
        Some(w) => tracing::info!(
            fields = ?WALLET_INJECTED_FIELDS,
            address = %w.address(),
            "wallet auto-inject enabled"
        ),
        None => tracing::info!("wallet auto-inject disabled (no wallet configured)"),
    }
    let registry = ToolRegistry::from_endpoints(meta.endpoints.iter().cloned());
    if registry.is_empty() {
        tracing::warn!("metadata listed no endpoints with an input schema");
    }
    tracing::info!(tools = registry.len(), "registration complete");
    Ok((meta, registry))
}

/// Everything a tool call needs; immutable after startup.
pub struct InvocationContext {
    pub client: PaytollClient,
    pub executor: TxExecutor,
    pub wallet: Option<WalletIdentity>,
}

impl InvocationContext {
    async fn run(&self, tool: &EndpointTool, args: &Value) -> Result<Value, PaytollError> {
        let params = tool
            .shape()
            .validate(args)
            .map_err(PaytollError::InvalidParams)?;
        let params = enrich_params(tool.name(), &tool.declared, params, self.wallet.as_ref())?;
        let raw = self
            .client
            .call_endpoint(&tool.endpoint().path, &tool.endpoint().method, &params)
            .await?;
        Ok(self.executor.execute(raw, self.wallet.as_ref()).await)
    }

    /// Tool handler: never fails, errors become an error-flagged result naming the tool.
    pub async fn invoke(&self, tool: &EndpointTool, args: &Value) -> Value {
        match self.run(tool, args).await {
            Ok(result) => tool_ok(&result),
            Err(e) => {
                tracing::warn!(tool = %tool.name(), error = %e, "tool call failed");
                let base = ToolError::from(e);
                let mut data = match base.data {
                    Value::Object(m) => m,
                    _ => serde_json::Map::new(),
                };
                data.insert("tool".to_owned(), Value::String(tool.name().to_owned()));
                tool_err(
                    ToolError::new(base.code, format!("Error calling {}: {}", tool.name(), base.message))
                        .with_data(Value::Object(data)),
                )
            }
        }
    }
}
