use serde_json::Value;

/**
Configuration for payload flattening.
*/
#[derive(Debug, Clone)]
pub struct Config {
    /**
    How many levels of nested maps are traversed before a subtree is
    escaped to its JSON text instead of being flattened further.
    */
    pub max_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config { max_depth: 3 }
    }
}

/**
Decompose a structured value into a flat list of key/value pairs.

Keys accumulate along the recursion path, joined with underscores. The
top-level call passes an empty `key_prefix` and depth `0`; a scalar
payload then comes back as a single pair with an empty key, which the
message assembly maps to the `_value` field.

Booleans are coerced to the integers `1` and `0`. Arrays are never
traversed element-by-element; they always appear as a single pair holding
their JSON text. Maps nested at or beyond `max_depth` are escaped to
their JSON text the same way. Nulls produce no pairs at all.
*/
pub(crate) fn flatten(
    value: &Value,
    key_prefix: &str,
    depth: usize,
    config: &Config,
) -> Vec<(String, Value)> {
    match value {
        Value::Bool(b) => {
            let n = if *b { 1 } else { 0 };
            vec![(key_prefix.to_owned(), Value::from(n))]
        }
        Value::Number(_) | Value::String(_) => vec![(key_prefix.to_owned(), value.clone())],
        Value::Object(map) => {
            if depth >= config.max_depth {
                escape(value, key_prefix)
            } else {
                let mut pairs = Vec::new();
                for (key, entry) in map {
                    let prefix = if key_prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}_{}", key_prefix, key)
                    };

                    pairs.extend(flatten(entry, &prefix, depth + 1, config));
                }
                pairs
            }
        }
        Value::Array(_) => escape(value, key_prefix),
        Value::Null => Vec::new(),
    }
}

/// Serialize a subtree to its JSON text and carry it as a plain string,
/// keeping the outer object flat.
fn escape(value: &Value, key_prefix: &str) -> Vec<(String, Value)> {
    match serde_json::to_string(value) {
        Ok(json) => vec![(key_prefix.to_owned(), Value::String(json))],
        Err(_) => Vec::new(),
    }
}
