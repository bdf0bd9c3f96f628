//! Subscription filter and REQ encoding.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value, json};

use crate::identifiers::SubscriptionId;

// ============================================================================
// Filter
// ============================================================================

/// Subscription filter: event kinds plus one tag constraint.
///
/// Kinds are kept in descending order, matching what the relay expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Event kinds, highest first.
    kinds: Vec<u32>,
    /// Tag name without the `#` prefix.
    tag_name: String,
    /// Accepted tag values.
    tag_values: Vec<String>,
}

impl Filter {
    /// Builds the filter for one identity.
    ///
    /// Kinds are sorted descending and deduplicated.
    #[must_use]
    pub fn for_identity(
        kinds: impl IntoIterator<Item = u32>,
        tag_name: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        let mut kinds: Vec<u32> = kinds.into_iter().collect();
        kinds.sort_unstable_by(|a, b| b.cmp(a));
        kinds.dedup();

        Self {
            kinds,
            tag_name: tag_name.into(),
            tag_values: vec![identity.into()],
        }
    }

    /// Returns the event kinds.
    #[inline]
    #[must_use]
    pub fn kinds(&self) -> &[u32] {
        &self.kinds
    }

    /// Returns the tag key as it appears on the wire, e.g. `#h`.
    #[must_use]
    pub fn tag_key(&self) -> String {
        format!("#{}", self.tag_name)
    }

    /// Returns the tag values.
    #[inline]
    #[must_use]
    pub fn tag_values(&self) -> &[String] {
        &self.tag_values
    }

    /// Converts to the JSON filter object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("kinds".into(), json!(self.kinds));
        object.insert(self.tag_key(), json!(self.tag_values));
        Value::Object(object)
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes `["REQ", id, filter]`.
#[must_use]
pub fn encode_subscribe(id: &SubscriptionId, filter: &Filter) -> String {
    json!(["REQ", id.as_str(), filter.to_value()]).to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_sorted_descending() {
        let filter = Filter::for_identity([20284, 20285, 20284], "h", "pk");
        assert_eq!(filter.kinds(), &[20285, 20284]);
    }

    #[test]
    fn test_encode_subscribe_shape() {
        let filter = Filter::for_identity([20285, 20284], "h", "deadbeef");
        let raw = encode_subscribe(&SubscriptionId::new("0123456789abcdef"), &filter);

        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            value,
            json!(["REQ", "0123456789abcdef", {"kinds": [20285, 20284], "#h": ["deadbeef"]}])
        );
    }

    #[test]
    fn test_encode_subscribe_deterministic() {
        let id = SubscriptionId::new("aa");
        let a = encode_subscribe(&id, &Filter::for_identity([1, 2], "h", "pk"));
        let b = encode_subscribe(&id, &Filter::for_identity([2, 1], "h", "pk"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_custom_tag() {
        let filter = Filter::for_identity([1], "p", "pk");
        assert_eq!(filter.tag_key(), "#p");
        assert_eq!(filter.to_value()["#p"], json!(["pk"]));
    }
}
