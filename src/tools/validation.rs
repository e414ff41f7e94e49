//! Argument validation against a tool's JSON schema.
//!
//! Covers what the capability contracts use: object type, required fields,
//! property types, and numeric `minimum`/`exclusiveMinimum`/`maximum` bounds.

use serde_json::Value;

/// Returns the first violation found, or `Ok(())`.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(format!(
            "expected an object of arguments, got {}",
            json_type_name(args)
        ));
    }

    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            match obj.get(name) {
                None | Some(Value::Null) => {
                    return Err(format!("missing required field '{}'", name));
                }
                Some(_) => {}
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in obj {
        let Some(prop) = properties.get(key) else {
            continue;
        };

        // Optional fields may be sent as null.
        if value.is_null() {
            continue;
        }

        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            if !value_matches_type(value, expected) {
                return Err(format!(
                    "field '{}' expected type '{}', got {}",
                    key,
                    expected,
                    json_type_name(value)
                ));
            }
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = prop.get("minimum").and_then(Value::as_f64) {
                if number < min {
                    return Err(format!("field '{}' must be at least {}", key, min));
                }
            }
            if let Some(min) = prop.get("exclusiveMinimum").and_then(Value::as_f64) {
                if number <= min {
                    return Err(format!("field '{}' must be greater than {}", key, min));
                }
            }
            if let Some(max) = prop.get("maximum").and_then(Value::as_f64) {
                if number > max {
                    return Err(format!("field '{}' must be at most {}", key, max));
                }
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
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
