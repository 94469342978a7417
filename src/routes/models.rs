//! Model listing filter
//!
//! The upstream model listing is relayed through [`filter_model_list`],
//! which drops deprecated models and any model matching the configured
//! exclusions. Anything that doesn't look like a listing passes through
//! untouched.

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

/// Marker looked for (case-insensitively) in model descriptions
const DEPRECATED_MARKER: &str = "deprecated";

/// Whether a listing entry should be dropped
fn is_filtered(model: &Value, excluded: &[String]) -> bool {
    let description = model
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if description.to_lowercase().contains(DEPRECATED_MARKER) {
        return true;
    }

    let name = model
        .get("name")
        .or_else(|| model.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    excluded
        .iter()
        .any(|pattern| !pattern.is_empty() && name.contains(pattern.as_str()))
}

/// Filter a model listing body
///
/// Handles the native shape (`{"models": [...]}`, keyed by `name`) and the
/// OpenAI shape (`{"data": [...]}`, keyed by `id`). The original bytes are
/// returned when nothing was dropped or the body can't be parsed.
pub fn filter_model_list(body: &[u8], excluded: &[String]) -> Bytes {
    let mut listing: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Model listing is not JSON, relaying unchanged");
            return Bytes::copy_from_slice(body);
        }
    };

    let Some(field) = ["models", "data"]
        .into_iter()
        .find(|field| listing.get(*field).is_some_and(Value::is_array))
    else {
        return Bytes::copy_from_slice(body);
    };
    let Some(entries) = listing.get_mut(field).and_then(Value::as_array_mut) else {
        return Bytes::copy_from_slice(body);
    };

    let before = entries.len();
    entries.retain(|model| !is_filtered(model, excluded));
    let removed = before - entries.len();

    if removed == 0 {
        return Bytes::copy_from_slice(body);
    }

    debug!(removed, remaining = before - removed, "Filtered model listing");
    match serde_json::to_vec(&listing) {
        Ok(filtered) => Bytes::from(filtered),
        Err(e) => {
            warn!(error = %e, "Failed to re-encode model listing, relaying unchanged");
            Bytes::copy_from_slice(body)
        }
    }
}
