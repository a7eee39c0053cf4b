//! Pre-flight JSON-schema argument validation (spec §4.D).
//!
//! Checks tool call arguments against a tool's declared input schema before
//! a request is ever sent to the server. Errors are collected, not
//! first-wins, so a caller sees every violation in one round trip.

use serde_json::Value;

/// Validate `args` against `schema`, an (assumed object-typed) JSON Schema.
/// Returns the list of violations found; empty means the arguments are
/// valid.
#[must_use]
pub fn validate_arguments(schema: &Value, args: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_value(schema, args, "$", &mut errors);
    errors
}

fn validate_value(schema: &Value, value: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        let obj = value.as_object();
        for req in required {
            let Some(name) = req.as_str() else { continue };
            let present = obj.map(|o| o.contains_key(name)).unwrap_or(false);
            if !present {
                errors.push(format!("{path}: missing required property `{name}`"));
            }
        }
    }

    if let Some(expected_type) = schema_obj.get("type").and_then(Value::as_str) {
        if !matches_type(expected_type, value) {
            errors.push(format!(
                "{path}: expected type `{expected_type}`, got `{}`",
                type_name(value)
            ));
            return;
        }
    }

    if let (Some(props), Some(obj)) = (
        schema_obj.get("properties").and_then(Value::as_object),
        value.as_object(),
    ) {
        for (key, sub_schema) in props {
            if let Some(sub_value) = obj.get(key) {
                validate_value(sub_schema, sub_value, &format!("{path}.{key}"), errors);
            }
        }
    }

    if let (Some(items_schema), Some(arr)) =
        (schema_obj.get("items"), value.as_array())
    {
        for (i, item) in arr.iter().enumerate() {
            validate_value(items_schema, item, &format!("{path}[{i}]"), errors);
        }
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
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
    fn accepts_valid_arguments() {
        let schema = json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {"type": "string"},
                "count": {"type": "integer"}
            }
        });
        let args = json!({"name": "widget", "count": 3});
        assert!(validate_arguments(&schema, &args).is_empty());
    }

    #[test]
    fn reports_missing_required_field() {
        let schema = json!({
            "type": "object",
            "required": ["name"],
            "properties": {"name": {"type": "string"}}
        });
        let args = json!({});
        let errors = validate_arguments(&schema, &args);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("name"));
    }

    #[test]
    fn collects_multiple_violations() {
        let schema = json!({
            "type": "object",
            "required": ["name", "count"],
            "properties": {
                "name": {"type": "string"},
                "count": {"type": "integer"}
            }
        });
        let args = json!({"count": "not-a-number"});
        let errors = validate_arguments(&schema, &args);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn validates_array_items_recursively() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            }
        });
        let args = json!({"tags": ["ok", 5]});
        let errors = validate_arguments(&schema, &args);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("[1]"));
    }

    #[test]
    fn allows_additional_properties_by_default() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}}
        });
        let args = json!({"name": "x", "extra": true});
        assert!(validate_arguments(&schema, &args).is_empty());
    }
}
