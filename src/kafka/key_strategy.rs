use serde_json::Value;
use tracing::debug;

/// How a message key is derived from an event payload.
///
/// Records with the same key land on the same partition and are therefore
/// read back in publication order. `None` leaves partitioning to the broker
/// and gives no ordering guarantee across records.
#[derive(Debug, Clone, Default)]
pub enum KeyStrategy {
    /// Dotted path into the payload, e.g. `customer.id`.
    FieldPath(String),
    /// Several paths joined with `:`. Every field must be present.
    Composite(Vec<String>),
    #[default]
    None,
}

impl KeyStrategy {
    pub fn extract_key(&self, payload: &Value) -> Option<String> {
        match self {
            KeyStrategy::FieldPath(path) => extract_field_value(payload, path),
            KeyStrategy::Composite(fields) => extract_composite_key(payload, fields),
            KeyStrategy::None => None,
        }
    }
}

fn extract_field_value(payload: &Value, field_path: &str) -> Option<String> {
    let mut current = payload;

    for part in field_path.split('.') {
        match current.get(part) {
            Some(value) => current = value,
            None => {
                debug!("Field '{}' not found in payload", part);
                return None;
            }
        }
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        _ => Some(current.to_string()),
    }
}

fn extract_composite_key(payload: &Value, fields: &[String]) -> Option<String> {
    let mut key_parts = Vec::with_capacity(fields.len());

    for field in fields {
        match extract_field_value(payload, field) {
            Some(value) => key_parts.push(value),
            None => {
                debug!("Missing field '{}' for composite key", field);
                return None;
            }
        }
    }

    if key_parts.is_empty() {
        None
    } else {
        Some(key_parts.join(":"))
    }
}
