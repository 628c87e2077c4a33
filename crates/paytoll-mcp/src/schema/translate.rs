use super::{InputSchema, NumericBounds, PropertySchema};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::warn;

/// A compiled `pattern` constraint. Equality is by source text so translations compare.
#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    re: Regex,
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Check {
    Any,
    String {
        pattern: Option<Pattern>,
        min_length: Option<u64>,
        max_length: Option<u64>,
    },
    /// Enum-restricted value; `base` is the declared JSON type used for documentation only.
    Literals {
        base: &'static str,
        values: Vec<Value>,
    },
    Number {
        integer: bool,
        bounds: NumericBounds,
    },
    Boolean,
    Array {
        items: Box<Validator>,
        min_items: Option<u64>,
        max_items: Option<u64>,
    },
    Object(ParamShape),
    /// Free-form object with arbitrary keys.
    Record,
}

/// Runtime validator for one parameter, carrying its documentation text.
#[derive(Debug, Clone, PartialEq)]
pub struct Validator {
    check: Check,
    description: Option<String>,
    optional: bool,
}

/// Validators keyed by parameter name: the callable contract of one tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamShape {
    fields: BTreeMap<String, Validator>,
}

/// Translate an endpoint's input schema. Names in `required` without a matching property are
/// ignored; every other property becomes optional.
pub fn translate(schema: &InputSchema) -> ParamShape {
    object_shape(&schema.properties, &schema.required)
}

pub fn translate_property(prop: &PropertySchema) -> Validator {
    let check = match prop {
        PropertySchema::String {
            enum_values,
            pattern,
            min_length,
            max_length,
            ..
        } => {
            if enum_values.is_empty() {
                Check::String {
                    pattern: pattern.as_deref().and_then(compile_pattern),
                    min_length: *min_length,
                    max_length: *max_length,
                }
            } else {
                Check::Literals {
                    base: "string",
                    values: enum_values.clone(),
                }
            }
        }
        PropertySchema::Number {
            bounds,
            enum_values,
            ..
        } => numeric(false, bounds, enum_values),
        PropertySchema::Integer {
            bounds,
            enum_values,
            ..
        } => numeric(true, bounds, enum_values),
        PropertySchema::Boolean { .. } => Check::Boolean,
        PropertySchema::Array {
            items,
            min_items,
            max_items,
            ..
        } => Check::Array {
            items: Box::new(items.as_deref().map_or_else(Validator::any, translate_property)),
            min_items: *min_items,
            max_items: *max_items,
        },
        PropertySchema::Object {
            properties: Some(props),
            required,
            ..
        } => Check::Object(object_shape(props, required)),
        PropertySchema::Object {
            properties: None, ..
        } => Check::Record,
        PropertySchema::Unknown { .. } => Check::Any,
    };

    Validator {
        check,
        description: prop.description().map(str::to_owned),
        optional: false,
    }
}

fn numeric(integer: bool, bounds: &NumericBounds, enum_values: &[Value]) -> Check {
    if enum_values.is_empty() {
        Check::Number {
            integer,
            bounds: bounds.clone(),
        }
    } else {
        Check::Literals {
            base: if integer { "integer" } else { "number" },
            values: enum_values.to_vec(),
        }
    }
}

fn compile_pattern(source: &str) -> Option<Pattern> {
    match Regex::new(source) {
        Ok(re) => Some(Pattern {
            source: source.to_owned(),
            re,
        }),
        Err(e) => {
            warn!(pattern = source, error = %e, "dropping uncompilable schema pattern");
            None
        }
    }
}

fn object_shape(props: &BTreeMap<String, PropertySchema>, required: &[String]) -> ParamShape {
    let fields = props
        .iter()
        .map(|(name, prop)| {
            let mut v = translate_property(prop);
            v.optional = !required.iter().any(|r| r == name);
            (name.clone(), v)
        })
        .collect();
    ParamShape { fields }
}

/// Literal equality where `1` and `1.0` are the same number.
fn literal_matches(expected: &Value, got: &Value) -> bool {
    match (expected, got) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y) == Some(Ordering::Equal),
                _ => a == b,
            },
        },
        _ => expected == got,
    }
}

fn is_integral(n: &serde_json::Number) -> bool {
    n.is_i64()
        || n.is_u64()
        || n.as_f64()
            .is_some_and(|f| f.fract().partial_cmp(&0.0_f64) == Some(Ordering::Equal))
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Validator {
    fn any() -> Self {
        Self {
            check: Check::Any,
            description: None,
            optional: false,
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub const fn is_optional(&self) -> bool {
        self.optional
    }

    /// Validate one present value, returning the accepted value (unknown object keys
    /// stripped) or pushing a path-qualified issue.
    fn accept(&self, v: &Value, path: &str, issues: &mut Vec<String>) -> Option<Value> {
        let label = if path.is_empty() { "value" } else { path };
        let mismatch = |expected: &str, issues: &mut Vec<String>| -> Option<Value> {
            issues.push(format!("{label}: expected {expected}, got {}", type_name(v)));
            None
        };

        match &self.check {
            Check::Any => Some(v.clone()),
            Check::Boolean => {
                if v.is_boolean() {
                    Some(v.clone())
                } else {
                    mismatch("boolean", issues)
                }
            }
            Check::Literals { values, .. } => {
                if values.iter().any(|allowed| literal_matches(allowed, v)) {
                    Some(v.clone())
                } else {
                    issues.push(format!(
                        "{label}: expected one of {}, got {v}",
                        Value::Array(values.clone())
                    ));
                    None
                }
            }
            Check::String {
                pattern,
                min_length,
                max_length,
            } => {
                let Some(s) = v.as_str() else {
                    return mismatch("string", issues);
                };
                let before = issues.len();
                // Lengths count UTF-16 code units, matching how callers' JSON tooling measures strings.
                let len = u64::try_from(s.encode_utf16().count()).unwrap_or(u64::MAX);
                if let Some(min) = min_length.filter(|min| len < *min) {
                    issues.push(format!("{label}: must contain at least {min} character(s)"));
                }
                if let Some(max) = max_length.filter(|max| len > *max) {
                    issues.push(format!("{label}: must contain at most {max} character(s)"));
                }
                if let Some(p) = pattern.as_ref().filter(|p| !p.re.is_match(s)) {
                    issues.push(format!("{label}: must match pattern {}", p.source));
                }
                (issues.len() == before).then(|| v.clone())
            }
            Check::Number { integer, bounds } => {
                let Some(n) = v.as_number() else {
                    return mismatch(if *integer { "integer" } else { "number" }, issues);
                };
                let before = issues.len();
                if *integer && !is_integral(n) {
                    issues.push(format!("{label}: expected integer, got {n}"));
                }
                if let Some(f) = n.as_f64() {
                    if let Some(min) = bounds.minimum.filter(|min| f < *min) {
                        issues.push(format!("{label}: must be greater than or equal to {min}"));
                    }
                    if let Some(max) = bounds.maximum.filter(|max| f > *max) {
                        issues.push(format!("{label}: must be less than or equal to {max}"));
                    }
                }
                (issues.len() == before).then(|| v.clone())
            }
            Check::Array {
                items,
                min_items,
                max_items,
            } => {
                let Some(arr) = v.as_array() else {
                    return mismatch("array", issues);
                };
                let before = issues.len();
                let count = u64::try_from(arr.len()).unwrap_or(u64::MAX);
                if let Some(min) = min_items.filter(|min| count < *min) {
                    issues.push(format!("{label}: must contain at least {min} item(s)"));
                }
                if let Some(max) = max_items.filter(|max| count > *max) {
                    issues.push(format!("{label}: must contain at most {max} item(s)"));
                }
                let accepted: Vec<Value> = arr
                    .iter()
                    .enumerate()
                    .filter_map(|(i, item)| items.accept(item, &format!("{label}[{i}]"), issues))
                    .collect();
                (issues.len() == before).then_some(Value::Array(accepted))
            }
            Check::Object(shape) => {
                let Some(obj) = v.as_object() else {
                    return mismatch("object", issues);
                };
                shape.accept(obj, path, issues).map(Value::Object)
            }
            Check::Record => {
                if v.is_object() {
                    Some(v.clone())
                } else {
                    mismatch("object", issues)
                }
            }
        }
    }

    /// JSON Schema rendering surfaced to the calling agent.
    pub fn to_json_schema(&self) -> Value {
        let mut out = match &self.check {
            Check::Any => json!({}),
            Check::Boolean => json!({ "type": "boolean" }),
            Check::Literals { base, values } => json!({ "type": base, "enum": values }),
            Check::String {
                pattern,
                min_length,
                max_length,
            } => {
                let mut m = Map::new();
                m.insert("type".into(), json!("string"));
                if let Some(p) = pattern {
                    m.insert("pattern".into(), json!(p.source));
                }
                if let Some(min) = min_length {
                    m.insert("minLength".into(), json!(min));
                }
                if let Some(max) = max_length {
                    m.insert("maxLength".into(), json!(max));
                }
                Value::Object(m)
            }
            Check::Number { integer, bounds } => {
                let mut m = Map::new();
                m.insert(
                    "type".into(),
                    json!(if *integer { "integer" } else { "number" }),
                );
                if let Some(min) = bounds.minimum {
                    m.insert("minimum".into(), json!(min));
                }
                if let Some(max) = bounds.maximum {
                    m.insert("maximum".into(), json!(max));
                }
                Value::Object(m)
            }
            Check::Array {
                items,
                min_items,
                max_items,
            } => {
                let mut m = Map::new();
                m.insert("type".into(), json!("array"));
                m.insert("items".into(), items.to_json_schema());
                if let Some(min) = min_items {
                    m.insert("minItems".into(), json!(min));
                }
                if let Some(max) = max_items {
                    m.insert("maxItems".into(), json!(max));
                }
                Value::Object(m)
            }
            Check::Object(shape) => shape.to_json_schema(),
            Check::Record => json!({ "type": "object", "additionalProperties": {} }),
        };
        if let (Some(d), Some(m)) = (self.description(), out.as_object_mut()) {
            m.insert("description".into(), json!(d));
        }
        out
    }
}

impl ParamShape {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&Validator> {
        self.fields.get(name)
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn accept(
        &self,
        obj: &Map<String, Value>,
        path: &str,
        issues: &mut Vec<String>,
    ) -> Option<Map<String, Value>> {
        let before = issues.len();
        let mut out = Map::new();
        for (name, validator) in &self.fields {
            let field_path = join_path(path, name);
            match obj.get(name) {
                Some(v) => {
                    if let Some(accepted) = validator.accept(v, &field_path, issues) {
                        out.insert(name.clone(), accepted);
                    }
                }
                None if validator.optional => {}
                None => issues.push(format!("{field_path}: required")),
            }
        }
        (issues.len() == before).then_some(out)
    }

    /// Validate tool-call arguments. Undeclared keys are dropped from the result.
    ///
    /// `null` arguments are treated as an empty object.
    pub fn validate(&self, args: &Value) -> Result<Map<String, Value>, String> {
        let empty = Map::new();
        let obj = match args {
            Value::Object(m) => m,
            Value::Null => &empty,
            other => return Err(format!("arguments: expected object, got {}", type_name(other))),
        };
        let mut issues = Vec::new();
        self.accept(obj, "", &mut issues)
            .ok_or_else(|| issues.join("; "))
    }

    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|(_, v)| !v.is_optional())
            .map(|(k, _)| k.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shape(schema: Value) -> eyre::Result<ParamShape> {
        let s: InputSchema = serde_json::from_value(schema)?;
        Ok(translate(&s))
    }

    #[test]
    fn accepts_values_satisfying_constraints() -> eyre::Result<()> {
        let s = shape(json!({
            "type": "object",
            "properties": {
                "address": { "type": "string", "pattern": "^0x[0-9a-fA-F]{4}$", "minLength": 6, "maxLength": 6 },
                "amount": { "type": "number", "minimum": 0, "maximum": 100 },
                "count": { "type": "integer" },
                "verbose": { "type": "boolean" },
                "tags": { "type": "array", "items": { "type": "string" }, "minItems": 1, "maxItems": 2 }
            },
            "required": ["address", "amount"]
        }))?;

        let ok = s.validate(&json!({
            "address": "0xabcd",
            "amount": 12.5,
            "count": 3,
            "verbose": true,
            "tags": ["a"]
        }));
        assert!(ok.is_ok(), "{ok:?}");

        let err = s
            .validate(&json!({ "address": "0xzzzz", "amount": 101, "count": 1.5 }))
            .err()
            .unwrap_or_default();
        assert!(err.contains("address: must match pattern"), "{err}");
        assert!(err.contains("amount: must be less than or equal to 100"), "{err}");
        assert!(err.contains("count: expected integer"), "{err}");

        let err = s.validate(&json!({ "tags": [] })).err().unwrap_or_default();
        assert!(err.contains("address: required"), "{err}");
        assert!(err.contains("amount: required"), "{err}");
        assert!(err.contains("tags: must contain at least 1 item(s)"), "{err}");
        Ok(())
    }

    #[test]
    fn optional_fields_accept_absence_but_not_null() -> eyre::Result<()> {
        let s = shape(json!({
            "properties": { "memo": { "type": "string" } }
        }))?;
        assert!(s.validate(&json!({})).is_ok());
        assert!(s.validate(&Value::Null).is_ok());
        assert!(s.validate(&json!({ "memo": null })).is_err());
        assert!(s.get("memo").is_some_and(Validator::is_optional));
        Ok(())
    }

    #[test]
    fn enum_takes_precedence_over_pattern_and_bounds() -> eyre::Result<()> {
        let s = shape(json!({
            "properties": {
                "side": { "type": "string", "enum": ["buy", "sell"], "pattern": "^x$", "maxLength": 1 },
                "tier": { "type": "integer", "enum": [1, 5], "minimum": 10 }
            },
            "required": ["side", "tier"]
        }))?;

        assert!(s.validate(&json!({ "side": "sell", "tier": 5 })).is_ok());
        assert!(s.validate(&json!({ "side": "sell", "tier": 5.0 })).is_ok());
        assert!(s.validate(&json!({ "side": "x", "tier": 1 })).is_err());
        assert!(s.validate(&json!({ "side": "buy", "tier": 10 })).is_err());
        Ok(())
    }

    #[test]
    fn nested_objects_strip_unknown_keys_and_enforce_required() -> eyre::Result<()> {
        let s = shape(json!({
            "properties": {
                "route": {
                    "type": "object",
                    "properties": {
                        "from": { "type": "string" },
                        "hops": { "type": "integer" }
                    },
                    "required": ["from"]
                },
                "extra": { "type": "object" }
            },
            "required": ["route"]
        }))?;

        let out = s
            .validate(&json!({
                "route": { "from": "eth", "junk": 1 },
                "extra": { "anything": [1, 2] },
                "undeclared": true
            }))
            .map_err(|e| eyre::eyre!(e))?;
        assert_eq!(
            Value::Object(out),
            json!({ "route": { "from": "eth" }, "extra": { "anything": [1, 2] } })
        );

        let err = s
            .validate(&json!({ "route": { "hops": 2 }, "extra": [] }))
            .err()
            .unwrap_or_default();
        assert!(err.contains("route.from: required"), "{err}");
        assert!(err.contains("extra: expected object, got array"), "{err}");
        Ok(())
    }

    #[test]
    fn unknown_types_and_untyped_items_accept_anything() -> eyre::Result<()> {
        let s = shape(json!({
            "properties": {
                "blob": { "type": "bigint", "description": "opaque" },
                "list": { "type": "array" }
            },
            "required": ["blob", "list"]
        }))?;
        assert!(s
            .validate(&json!({ "blob": { "x": 1 }, "list": [1, "two", null] }))
            .is_ok());
        assert_eq!(s.get("blob").and_then(Validator::description), Some("opaque"));
        Ok(())
    }

    #[test]
    fn uncompilable_pattern_is_dropped() -> eyre::Result<()> {
        let s = shape(json!({
            "properties": { "name": { "type": "string", "pattern": "(?<=a)b", "minLength": 2 } },
            "required": ["name"]
        }))?;
        assert!(s.validate(&json!({ "name": "zz" })).is_ok());
        assert!(s.validate(&json!({ "name": "z" })).is_err());
        Ok(())
    }

    #[test]
    fn translation_is_idempotent() -> eyre::Result<()> {
        let raw = json!({
            "properties": {
                "a": { "type": "string", "pattern": "^a+$" },
                "b": { "type": "array", "items": { "type": "object", "properties": { "c": { "type": "number" } } } }
            },
            "required": ["a"]
        });
        let schema: InputSchema = serde_json::from_value(raw)?;
        assert_eq!(translate(&schema), translate(&schema));
        Ok(())
    }

    #[test]
    fn renders_json_schema_with_descriptions() -> eyre::Result<()> {
        let s = shape(json!({
            "properties": {
                "chain": { "type": "string", "enum": ["base"], "description": "Target chain" },
                "amount": { "type": "number", "minimum": 1 }
            },
            "required": ["chain"]
        }))?;
        assert_eq!(
            s.to_json_schema(),
            json!({
                "type": "object",
                "properties": {
                    "amount": { "type": "number", "minimum": 1.0 },
                    "chain": { "type": "string", "enum": ["base"], "description": "Target chain" }
                },
                "required": ["chain"],
                "additionalProperties": false
            })
        );
        Ok(())
    }
}
