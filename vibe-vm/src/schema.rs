//! # Response schemas
//!
//! JSON-schema shapes handed to the oracle to constrain a reply. The service
//! accepts a reduced schema dialect, so every array names its item type.

use serde_json::json;

/// Any JSON array of strings - used for map dimensions and list repair
pub fn generic_list_schema() -> serde_json::Value {
    json!({
        "type": "array",
        "items": { "type": "string" }
    })
}

/// Array of strings drawn from `values`
pub fn string_enum_array(values: &[&str], description: &str) -> serde_json::Value {
    json!({
        "type": "array",
        "items": { "type": "string", "enum": values },
        "description": description,
    })
}

/// Array of free-form strings
pub fn string_array(description: &str) -> serde_json::Value {
    json!({
        "type": "array",
        "items": { "type": "string" },
        "description": description,
    })
}
