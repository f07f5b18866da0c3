//! Structural checks on inbound frames, run before typed decoding.

use super::SecurityError;
use crate::config::SecurityConfig;
use serde_json::Value;

/// Validates a raw frame against the configured limits and returns the
/// envelope's event name.
pub fn validate_json_message(message: &[u8], config: &SecurityConfig) -> Result<String, SecurityError> {
    if message.len() > config.max_message_size {
        return Err(SecurityError::MessageTooLarge(message.len()));
    }

    let json: Value =
        serde_json::from_slice(message).map_err(|e| SecurityError::InvalidMessageFormat(e.to_string()))?;

    validate_json_value(&json, 0, config)?;

    let event = json
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| SecurityError::InvalidMessageFormat("missing event name".to_string()))?;
    validate_event_name(event)?;
    Ok(event.to_string())
}

fn validate_json_value(value: &Value, depth: usize, config: &SecurityConfig) -> Result<(), SecurityError> {
    if depth > config.max_json_depth {
        return Err(SecurityError::InvalidMessageFormat("JSON nesting too deep".to_string()));
    }

    match value {
        Value::String(s) => {
            if s.len() > config.max_string_length {
                return Err(SecurityError::InvalidMessageFormat(format!(
                    "String too long: {} characters",
                    s.len()
                )));
            }
            validate_string_content(s)?;
        }
        Value::Array(arr) => {
            if arr.len() > config.max_collection_size {
                return Err(SecurityError::InvalidMessageFormat(format!(
                    "Array too large: {} elements",
                    arr.len()
                )));
            }
            for item in arr {
                validate_json_value(item, depth + 1, config)?;
            }
        }
        Value::Object(obj) => {
            if obj.len() > config.max_collection_size {
                return Err(SecurityError::InvalidMessageFormat(format!(
                    "Object too large: {} keys",
                    obj.len()
                )));
            }
            for (key, val) in obj {
                if key.len() > config.max_string_length {
                    return Err(SecurityError::InvalidMessageFormat(format!(
                        "Object key too long: {} characters",
                        key.len()
                    )));
                }
                validate_string_content(key)?;
                validate_json_value(val, depth + 1, config)?;
            }
        }
        Value::Number(n) => {
            if n.as_f64().is_some_and(|f| !f.is_finite()) {
                return Err(SecurityError::InvalidMessageFormat("Invalid number: not finite".to_string()));
            }
        }
        Value::Bool(_) | Value::Null => {}
    }

    Ok(())
}

fn validate_string_content(s: &str) -> Result<(), SecurityError> {
    if s.contains('\0') {
        return Err(SecurityError::MaliciousContent);
    }

    let control_char_count = s
        .chars()
        .filter(|c| c.is_control() && *c != '\n' && *c != '\r' && *c != '\t')
        .count();
    if control_char_count > 5 {
        return Err(SecurityError::MaliciousContent);
    }

    Ok(())
}

/// Event names are short snake_case identifiers.
pub fn validate_event_name(event_name: &str) -> Result<(), SecurityError> {
    if event_name.is_empty() || event_name.len() > 64 {
        return Err(SecurityError::InvalidMessageFormat("Invalid event name length".to_string()));
    }

    if !event_name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(SecurityError::InvalidMessageFormat("Invalid event name characters".to_string()));
    }

    Ok(())
}
