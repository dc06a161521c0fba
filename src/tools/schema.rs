//! A small, deliberately non-exhaustive JSON Schema validator.
//!
//! Only the subset spec §9 requires ("JSON schema validation of tool
//! parameters is required before calling execute") is implemented:
//! `type: object` with `required` and per-property `type` checks. This
//! is enough to catch the malformed-call cases the executor cares about
//! (missing required field, wrong JSON type) without pulling in a full
//! schema engine the rest of the corpus doesn't depend on.

use serde_json::Value;
use std::collections::HashMap;

pub fn validate(schema: &Value, params: &HashMap<String, Value>) -> Result<(), String> {
    let Some(obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(required) = obj.get("required").and_then(|r| r.as_array()) {
        for req in required {
            let Some(name) = req.as_str() else { continue };
            if !params.contains_key(name) {
                return Err(format!("missing required parameter '{name}'"));
            }
        }
    }

    if let Some(properties) = obj.get("properties").and_then(|p| p.as_object()) {
        for (name, value) in params {
            let Some(prop_schema) = properties.get(name) else { continue };
            let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) else { continue };
            if !matches_type(value, expected_type) {
                return Err(format!(
                    "parameter '{name}' expected type '{expected_type}', got '{}'",
                    json_type_name(value)
                ));
            }
        }
    }

    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true, // unknown schema type keywords are not enforced
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_required_field_rejected() {
        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        });
        let params = HashMap::new();
        assert!(validate(&schema, &params).is_err());
    }

    #[test]
    fn wrong_type_rejected() {
        let schema = json!({
            "type": "object",
            "properties": { "count": { "type": "integer" } }
        });
        let mut params = HashMap::new();
        params.insert("count".to_string(), json!("not a number"));
        assert!(validate(&schema, &params).is_err());
    }

    #[test]
    fn well_formed_params_pass() {
        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        });
        let mut params = HashMap::new();
        params.insert("path".to_string(), json!("/tmp/x"));
        assert!(validate(&schema, &params).is_ok());
    }
}
