//! Small accessors shared by every built-in tool for pulling typed values
//! out of the untyped `HashMap<String, Value>` parameters a [`ToolCall`]
//! carries. Centralized so every tool reports missing/malformed
//! parameters the same way.
//!
//! [`ToolCall`]: crate::types::ToolCall

use serde_json::Value;
use std::collections::HashMap;

pub fn require_str<'a>(params: &'a HashMap<String, Value>, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing or non-string parameter '{key}'"))
}

pub fn opt_str<'a>(params: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn opt_bool(params: &HashMap<String, Value>, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

pub fn opt_u64(params: &HashMap<String, Value>, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.as_u64())
}
