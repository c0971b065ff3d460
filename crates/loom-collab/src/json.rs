//! Stands in for a dedicated JSON value tree: `serde_json::Value` already
//! is one, so this module is a re-export point, not a new type.

pub use serde_json::Value;
