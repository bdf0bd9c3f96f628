//! AUTH response inspection.
//!
//! The signed response is produced outside this crate and sent verbatim;
//! only its event id is read so the matching `OK` can be recognized.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Extraction
// ============================================================================

/// Returns the event id of an `["AUTH", {"id": ..., ...}]` frame.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the frame is not a JSON array of at least
/// two elements, or its second element has no string `id`.
pub fn extract_auth_event_id(raw: &str) -> Result<String> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| Error::decode(format!("invalid JSON: {e}")))?;

    let items = value
        .as_array()
        .ok_or_else(|| Error::decode("AUTH response is not a JSON array"))?;

    if items.len() < 2 {
        return Err(Error::decode(format!(
            "AUTH response has {} element(s), expected at least 2",
            items.len()
        )));
    }

    items[1]
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::decode("AUTH event has no id"))
}

// ============================================================================
// Tests
// ============================================================================
