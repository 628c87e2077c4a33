use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

mod jsonrpc;
mod state;
mod transport;

pub use jsonrpc::{tool_err, tool_ok};
pub use state::{ServerState, ServiceInfo};

use jsonrpc::{
    err, ok, JsonRpcResponse, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    RESOURCE_NOT_FOUND,
};

const PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

fn handle_initialize(id: Value) -> JsonRpcResponse {
    ok(
        id,
        json!({
          "protocolVersion": PROTOCOL_VERSION,
          "serverInfo": { "name": "paytoll", "version": env!("CARGO_PKG_VERSION") },
          "capabilities": { "tools": {}, "resources": {} }
        }),
    )
}

fn handle_resources_read(state: &ServerState, id: Value, params: &Value) -> JsonRpcResponse {
    let uri = params.get("uri").and_then(Value::as_str).unwrap_or_default();
    match state.read_resource(uri) {
        Some(contents) => ok(id, contents),
        None => err(id, RESOURCE_NOT_FOUND, format!("resource not found: {uri}")),
    }
}

async fn handle_tools_call(state: &ServerState, id: Value, params: &Value) -> JsonRpcResponse {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let Some(tool) = state.registry.get(name) else {
        return err(id, INVALID_PARAMS, format!("unknown tool: {name}"));
    };
    let args = params.get("arguments").cloned().unwrap_or(Value::Null);
    ok(id, state.ctx.invoke(tool, &args).await)
}

/// Serve JSON-RPC requests from `input` until EOF or an oversized line.
///
/// Tool calls run as separate tasks so a slow confirmation wait does not hold up other
/// requests; responses may therefore arrive out of order. Returns the writer once every
/// in-flight response has been written.
pub async fn serve<R, W>(state: Arc<ServerState>, input: R, mut output: W) -> eyre::Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
    let writer = tokio::spawn(async move {
        while let Some(resp) = rx.recv().await {
            transport::write_frame(&mut output, &resp).await?;
        }
        Ok::<_, eyre::Report>(output)
    });

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.len() > transport::MAX_LINE_BYTES {
            warn!(bytes = line.len(), "request line too large; closing session");
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let v: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "invalid json on stdin");
                continue;
            }
        };
        // Notifications carry no id and get no response.
        if v.get("id").is_none() {
            continue;
        }
        let req: JsonRpcRequest = match serde_json::from_value(v) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "failed to parse jsonrpc request");
                continue;
            }
        };

        let resp = if req.jsonrpc == "2.0" {
            match req.method.as_str() {
                "initialize" => handle_initialize(req.id),
                "ping" => ok(req.id, json!({})),
                "tools/list" => ok(req.id, state.registry.list_tools_result()),
                "resources/list" => ok(req.id, state.resources_list()),
                "resources/read" => handle_resources_read(&state, req.id, &req.params),
                "tools/call" => {
                    let state = Arc::clone(&state);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let resp = handle_tools_call(&state, req.id, &req.params).await;
                        if tx.send(resp).is_err() {
                            warn!("response writer closed before tool call finished");
                        }
                    });
                    continue;
                }
                _ => err(req.id, METHOD_NOT_FOUND, "method not found"),
            }
        } else {
            err(req.id, INVALID_REQUEST, "invalid jsonrpc version")
        };
        if tx.send(resp).is_err() {
            break;
        }
    }

    drop(tx);
    writer.await?
}

/// Run over the process's stdin/stdout.
pub async fn run(state: Arc<ServerState>) -> eyre::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    serve(state, stdin, tokio::io::stdout()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::ChainTable;
    use crate::client::{EndpointDescriptor, PaytollClient};
    use crate::executor::TxExecutor;
    use crate::registry::{InvocationContext, ToolRegistry};
    use std::time::Duration;

    struct NeverSends;

    #[async_trait::async_trait]
    impl crate::chains::TransactionSender for NeverSends {
        async fn send_and_confirm(
            &self,
            _wallet: &crate::wallet::WalletIdentity,
            _chain: &crate::chains::SupportedChain,
            _tx: &crate::chains::TransactionSpec,
            _timeout: Duration,
        ) -> eyre::Result<crate::chains::ConfirmedTx> {
            eyre::bail!("not expected in these tests")
        }
    }

    fn state() -> eyre::Result<Arc<ServerState>> {
        let registry = ToolRegistry::from_endpoints([EndpointDescriptor {
            name: "crypto-price".into(),
            path: "/v1/crypto/price".into(),
            method: "POST".into(),
            price: "$0.005".into(),
            description: "Token price".into(),
            category: "crypto".into(),
            version: "1".into(),
            input_schema: Some(json!({
                "properties": { "symbol": { "type": "string", "minLength": 1 } },
                "required": ["symbol"]
            })),
        }]);
        let ctx = InvocationContext {
            client: PaytollClient::new("http://127.0.0.1:9", None)?,
            executor: TxExecutor::new(
                Arc::new(NeverSends),
                ChainTable::default(),
                Duration::from_secs(1),
            ),
            wallet: None,
        };
        let info = ServiceInfo::new("PayToll", "http://127.0.0.1:9", None, None, registry.len());
        Ok(Arc::new(ServerState {
            registry,
            ctx,
            info,
        }))
    }

    async fn roundtrip(input: &str) -> eyre::Result<Vec<Value>> {
        let out = serve(state()?, input.as_bytes(), Vec::new()).await?;
        let text = String::from_utf8(out)?;
        text.lines()
            .map(|l| serde_json::from_str(l).map_err(eyre::Report::from))
            .collect()
    }

    fn by_id(responses: &[Value], id: i64) -> eyre::Result<&Value> {
        responses
            .iter()
            .find(|r| r.get("id") == Some(&json!(id)))
            .ok_or_else(|| eyre::eyre!("no response for id {id}"))
    }

    #[tokio::test]
    async fn answers_core_methods_and_skips_notifications() -> eyre::Result<()> {
        let input = [
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "not json",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"resources/read","params":{"uri":"paytoll://info"}}"#,
            r#"{"jsonrpc":"2.0","id":4,"method":"nope"}"#,
            r#"{"jsonrpc":"1.0","id":5,"method":"ping"}"#,
        ]
        .join("\n");
        let responses = roundtrip(&input).await?;
        assert_eq!(responses.len(), 5);

        assert_eq!(
            by_id(&responses, 1)?.pointer("/result/serverInfo/name"),
            Some(&json!("paytoll"))
        );
        let tools = by_id(&responses, 2)?;
        assert_eq!(tools.pointer("/result/tools/0/name"), Some(&json!("crypto-price")));
        assert_eq!(
            tools.pointer("/result/tools/0/description"),
            Some(&json!("Token price (Price: $0.005)"))
        );

        let info_text = by_id(&responses, 3)?
            .pointer("/result/contents/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| eyre::eyre!("no info text"))?;
        let info: Value = serde_json::from_str(info_text)?;
        assert_eq!(info.get("walletMode"), Some(&json!("free_tier")));

        assert_eq!(by_id(&responses, 4)?.pointer("/error/code"), Some(&json!(-32601)));
        assert_eq!(by_id(&responses, 5)?.pointer("/error/code"), Some(&json!(-32600)));
        Ok(())
    }

    #[tokio::test]
    async fn tool_call_validation_failure_is_tool_error() -> eyre::Result<()> {
        let input = [
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"crypto-price","arguments":{"symbol":""}}}"#,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"missing","arguments":{}}}"#,
        ]
        .join("\n");
        let responses = roundtrip(&input).await?;

        let call = by_id(&responses, 1)?;
        assert_eq!(call.pointer("/result/isError"), Some(&json!(true)));
        let text = call
            .pointer("/result/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| eyre::eyre!("no text"))?;
        assert!(text.contains("invalid_params"), "{text}");

        assert_eq!(by_id(&responses, 2)?.pointer("/error/code"), Some(&json!(-32602)));
        Ok(())
    }

    #[tokio::test]
    async fn oversized_line_ends_session() -> eyre::Result<()> {
        let big = format!(
            "{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\",\"pad\":\"{}\"}}",
            "x".repeat(transport::MAX_LINE_BYTES)
        );
        let input = format!("{big}\n{{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}}\n");
        let responses = roundtrip(&input).await?;
        assert!(responses.is_empty());
        Ok(())
    }
}
