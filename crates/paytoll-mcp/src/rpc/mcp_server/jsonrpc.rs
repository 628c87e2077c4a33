use crate::errors::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const RESOURCE_NOT_FOUND: i64 = -32002;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

pub fn ok(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: Some(result),
        error: None,
    }
}

pub fn err(id: Value, code: i64, message: impl Into<String>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.into(),
        }),
    }
}

/// Successful tool result; the payload is pretty-printed JSON text.
pub fn tool_ok(payload: &Value) -> Value {
    let text = serde_json::to_string_pretty(payload).unwrap_or_else(|_e| payload.to_string());
    json!({
      "content": [{ "type": "text", "text": text }],
      "isError": false
    })
}

pub fn tool_err(tool_error: ToolError) -> Value {
    let text = serde_json::to_string(&tool_error).unwrap_or_else(|_e| {
        "{\"code\":\"error\",\"message\":\"failed to serialize error\"}".into()
    });
    json!({
      "content": [{ "type": "text", "text": text }],
      "isError": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_results_flag_errors() -> eyre::Result<()> {
        let good = tool_ok(&json!({ "a": 1 }));
        assert_eq!(good.get("isError"), Some(&json!(false)));
        assert_eq!(
            good.pointer("/content/0/text"),
            Some(&json!("{\n  \"a\": 1\n}"))
        );

        let bad = tool_err(ToolError::new("api_error", "API error 500: boom"));
        assert_eq!(bad.get("isError"), Some(&json!(true)));
        let text = bad
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| eyre::eyre!("no text"))?;
        let parsed: Value = serde_json::from_str(text)?;
        assert_eq!(parsed.get("code"), Some(&json!("api_error")));
        Ok(())
    }

    #[test]
    fn error_response_omits_result() -> eyre::Result<()> {
        let v = serde_json::to_value(err(json!(7), METHOD_NOT_FOUND, "method not found"))?;
        assert_eq!(
            v,
            json!({ "jsonrpc": "2.0", "id": 7, "error": { "code": -32601, "message": "method not found" } })
        );
        Ok(())
    }
}
