//! Input fields the agent never sees: they are stripped from advertised schemas and
//! filled from the configured wallet on every call.

use crate::errors::PaytollError;
use crate::schema::InputSchema;
use crate::wallet::WalletIdentity;
use serde_json::{Map, Value};

pub const WALLET_INJECTED_FIELDS: &[&str] = &["userAddress"];

/// Hidden fields that this schema declares at top level.
pub fn declared_hidden_fields<'a>(schema: &InputSchema, hidden: &[&'a str]) -> Vec<&'a str> {
    hidden
        .iter()
        .copied()
        .filter(|f| schema.properties.contains_key(*f))
        .collect()
}

/// Copy of `schema` without the hidden fields in `properties` or `required`.
pub fn schema_visible_to_caller(schema: &InputSchema, hidden: &[&str]) -> InputSchema {
    let mut out = schema.clone();
    if declared_hidden_fields(schema, hidden).is_empty() {
        return out;
    }
    out.properties.retain(|name, _| !hidden.contains(&name.as_str()));
    out.required.retain(|name| !hidden.contains(&name.as_str()));
    out
}

/// Fill every hidden field the declared schema needs with the wallet address.
pub fn enrich_params(
    tool: &str,
    declared: &InputSchema,
    mut params: Map<String, Value>,
    wallet: Option<&WalletIdentity>,
) -> Result<Map<String, Value>, PaytollError> {
    let needed = declared_hidden_fields(declared, WALLET_INJECTED_FIELDS);
    if needed.is_empty() {
        return Ok(params);
    }
    let Some(w) = wallet else {
        return Err(PaytollError::WalletRequired {
            tool: tool.to_owned(),
        });
    };
    let address = w.address().to_string();
    for field in needed {
        params.insert(field.to_owned(), Value::String(address.clone()));
    }
    Ok(params)
}
