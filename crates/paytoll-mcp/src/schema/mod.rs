//! Server-declared input schemas and their translation into runtime validators.
//!
//! The metadata endpoint describes every paid endpoint's input with a small JSON-Schema
//! dialect. [`PropertySchema`] parses any JSON value into exactly one variant (unrecognized
//! shapes land in [`PropertySchema::Unknown`]), so ingestion never fails on schema extensions.

mod translate;

pub use translate::{translate, ParamShape};

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Top-level input description of one endpoint.
///
/// Only `properties` has to be an object; a malformed `required` is treated as empty and
/// anything else at the top level (`type`, `additionalProperties`, ...) is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct InputSchema {
    pub properties: BTreeMap<String, PropertySchema>,
    pub required: Vec<String>,
}

impl TryFrom<Value> for InputSchema {
    type Error = String;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        let Value::Object(obj) = v else {
            return Err("input schema is not an object".to_owned());
        };
        let properties = properties_field(&obj)
            .ok_or_else(|| "input schema has no `properties` object".to_owned())?;
        Ok(Self {
            properties,
            required: required_field(&obj),
        })
    }
}

impl InputSchema {
    /// Parse a raw `inputSchema` value. `None` when it is absent, null, or lacks `properties`.
    pub fn from_value(v: &Value) -> Option<Self> {
        Self::try_from(v.clone()).ok()
    }

    #[cfg(test)]
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumericBounds {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub enum PropertySchema {
    String {
        description: Option<String>,
        pattern: Option<String>,
        min_length: Option<u64>,
        max_length: Option<u64>,
        enum_values: Vec<Value>,
    },
    Number {
        description: Option<String>,
        bounds: NumericBounds,
        enum_values: Vec<Value>,
    },
    Integer {
        description: Option<String>,
        bounds: NumericBounds,
        enum_values: Vec<Value>,
    },
    Boolean {
        description: Option<String>,
    },
    Array {
        description: Option<String>,
        items: Option<Box<PropertySchema>>,
        min_items: Option<u64>,
        max_items: Option<u64>,
    },
    Object {
        description: Option<String>,
        /// `None` means a free-form object.
        properties: Option<BTreeMap<String, PropertySchema>>,
        required: Vec<String>,
    },
    /// Missing or unrecognized `type`; validated permissively.
    Unknown {
        description: Option<String>,
        type_name: Option<String>,
    },
}

impl PropertySchema {
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::String { description, .. }
            | Self::Number { description, .. }
            | Self::Integer { description, .. }
            | Self::Boolean { description }
            | Self::Array { description, .. }
            | Self::Object { description, .. }
            | Self::Unknown { description, .. } => description.as_deref(),
        }
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn u64_field(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    obj.get(key).and_then(Value::as_u64)
}

fn f64_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64)
}

/// An absent or empty `enum` carries no constraint.
fn enum_field(obj: &Map<String, Value>) -> Vec<Value> {
    obj.get("enum")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn bounds_field(obj: &Map<String, Value>) -> NumericBounds {
    NumericBounds {
        minimum: f64_field(obj, "minimum"),
        maximum: f64_field(obj, "maximum"),
    }
}

fn properties_field(obj: &Map<String, Value>) -> Option<BTreeMap<String, PropertySchema>> {
    let props = obj.get("properties")?.as_object()?;
    Some(
        props
            .iter()
            .map(|(k, v)| (k.clone(), PropertySchema::from(v.clone())))
            .collect(),
    )
}

fn required_field(obj: &Map<String, Value>) -> Vec<String> {
    obj.get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

impl From<Value> for PropertySchema {
    fn from(v: Value) -> Self {
        let Value::Object(obj) = v else {
            return Self::Unknown {
                description: None,
                type_name: None,
            };
        };
        let description = str_field(&obj, "description");
        let type_name = str_field(&obj, "type");

        match type_name.as_deref() {
            Some("string") => Self::String {
                description,
                pattern: str_field(&obj, "pattern"),
                min_length: u64_field(&obj, "minLength"),
                max_length: u64_field(&obj, "maxLength"),
                enum_values: enum_field(&obj),
            },
            Some("number") => Self::Number {
                description,
                bounds: bounds_field(&obj),
                enum_values: enum_field(&obj),
            },
            Some("integer") => Self::Integer {
                description,
                bounds: bounds_field(&obj),
                enum_values: enum_field(&obj),
            },
            Some("boolean") => Self::Boolean { description },
            Some("array") => Self::Array {
                description,
                items: obj
                    .get("items")
                    .filter(|items| items.is_object())
                    .map(|items| Box::new(Self::from(items.clone()))),
                min_items: u64_field(&obj, "minItems"),
                max_items: u64_field(&obj, "maxItems"),
            },
            Some("object") => Self::Object {
                description,
                properties: properties_field(&obj),
                required: required_field(&obj),
            },
            _ => Self::Unknown {
                description,
                type_name,
            },
        }
    }
}
