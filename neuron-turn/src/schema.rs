//! JSON Schema sanitization for outbound tool definitions.

use serde_json::Value;

const STRIPPED_KEYS: &[&str] = &["additionalProperties", "$schema", "$defs", "definitions"];

/// Strip keys several vendors reject from a tool's JSON Schema
/// (`additionalProperties`, `$schema`, `$defs`, `definitions`),
/// recursing through nested objects and arrays so a `$defs` block
/// buried inside a property doesn't slip through.
pub fn sanitize_tool_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                if STRIPPED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                out.insert(key.clone(), sanitize_tool_schema(value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_tool_schema).collect()),
        other => other.clone(),
    }
}
