//! Inbound frame decoding.
//!
//! A malformed frame never terminates the connection: [`decode`] returns
//! [`Error::Decode`] and the caller logs and drops it.
//!
//! # Frame Types
//!
//! | Tag | Shape | Required |
//! |-----|-------|----------|
//! | `EVENT` | `["EVENT", subId, event]` | tag only |
//! | `EOSE` | `["EOSE", subId]` | tag only |
//! | `NOTICE` | `["NOTICE", text]` | text |
//! | `CLOSED` | `["CLOSED", subId, reason]` | tag only |
//! | `AUTH` | `["AUTH", challenge]` | challenge |
//! | `OK` | `["OK", eventId, status, message?]` | id, status |

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Frame
// ============================================================================

/// A decoded relay-to-client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Event matching a subscription.
    ///
    /// The event payload is left uninterpreted.
    Event {
        /// Subscription the event was delivered for.
        subscription_id: Option<String>,
        /// Raw event object.
        event: Option<Value>,
    },

    /// End of stored events.
    Eose {
        /// Subscription that finished replaying.
        subscription_id: Option<String>,
    },

    /// Human-readable relay notice.
    Notice {
        /// Notice text.
        message: String,
    },

    /// Subscription closed by the relay.
    Closed {
        /// Subscription that was closed.
        subscription_id: Option<String>,
        /// Reason given by the relay.
        message: Option<String>,
    },

    /// Authentication challenge.
    Auth {
        /// Challenge string to sign.
        challenge: String,
    },

    /// Acknowledgment of a submitted event.
    Ok {
        /// Id of the acknowledged event.
        event_id: String,
        /// Whether the relay accepted the event.
        accepted: bool,
        /// Optional relay message, empty when absent.
        message: String,
    },
}

impl Frame {
    /// Returns the wire tag of this frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event { .. } => "EVENT",
            Self::Eose { .. } => "EOSE",
            Self::Notice { .. } => "NOTICE",
            Self::Closed { .. } => "CLOSED",
            Self::Auth { .. } => "AUTH",
            Self::Ok { .. } => "OK",
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a raw text frame.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the text is not a JSON array, the tag is
/// missing or unknown, or a required element is missing or mistyped.
pub fn decode(raw: &str) -> Result<Frame> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| Error::decode(format!("invalid JSON: {e}")))?;

    let Value::Array(items) = value else {
        return Err(Error::decode("frame is not a JSON array"));
    };

    let tag = items
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::decode("frame has no message type tag"))?;

    match tag {
        "EVENT" => Ok(Frame::Event {
            subscription_id: optional_string(&items, 1),
            event: items.get(2).cloned(),
        }),

        "EOSE" => Ok(Frame::Eose {
            subscription_id: optional_string(&items, 1),
        }),

        "NOTICE" => Ok(Frame::Notice {
            message: required_string(&items, 1, "NOTICE message")?,
        }),

        "CLOSED" => Ok(Frame::Closed {
            subscription_id: optional_string(&items, 1),
            message: optional_string(&items, 2),
        }),

        "AUTH" => Ok(Frame::Auth {
            challenge: required_string(&items, 1, "AUTH challenge")?,
        }),

        "OK" => Ok(Frame::Ok {
            event_id: required_string(&items, 1, "OK event id")?,
            accepted: items
                .get(2)
                .and_then(Value::as_bool)
                .ok_or_else(|| Error::decode("OK frame missing status flag"))?,
            message: optional_string(&items, 3).unwrap_or_default(),
        }),

        other => Err(Error::decode(format!("unknown frame type: {other}"))),
    }
}

/// Reads a string element, failing when absent or not a string.
fn required_string(items: &[Value], index: usize, what: &str) -> Result<String> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::decode(format!("missing {what}")))
}

/// Reads a string element if present.
fn optional_string(items: &[Value], index: usize) -> Option<String> {
    items.get(index).and_then(Value::as_str).map(str::to_owned)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_decode_event() {
        let frame = decode(r#"["EVENT","sub1",{"id":"abc","kind":20284}]"#).unwrap();
        assert_eq!(
            frame,
            Frame::Event {
                subscription_id: Some("sub1".into()),
                event: Some(json!({"id": "abc", "kind": 20284})),
            }
        );
        assert_eq!(frame.kind(), "EVENT");
    }

    #[test]
    fn test_decode_bare_event() {
        let frame = decode(r#"["EVENT"]"#).unwrap();
        assert!(matches!(
            frame,
            Frame::Event {
                subscription_id: None,
                event: None
            }
        ));
    }

    #[test]
    fn test_decode_eose_and_closed() {
        assert_eq!(
            decode(r#"["EOSE","sub1"]"#).unwrap(),
            Frame::Eose {
                subscription_id: Some("sub1".into())
            }
        );
        assert_eq!(
            decode(r#"["CLOSED","sub1","auth-required: sign in"]"#).unwrap(),
            Frame::Closed {
                subscription_id: Some("sub1".into()),
                message: Some("auth-required: sign in".into()),
            }
        );
    }

    #[test]
    fn test_decode_notice() {
        assert_eq!(
            decode(r#"["NOTICE","rate limited"]"#).unwrap(),
            Frame::Notice {
                message: "rate limited".into()
            }
        );
        assert!(decode(r#"["NOTICE"]"#).unwrap_err().is_decode_error());
    }

    #[test]
    fn test_decode_auth_challenge() {
        assert_eq!(
            decode(r#"["AUTH","c1"]"#).unwrap(),
            Frame::Auth {
                challenge: "c1".into()
            }
        );
        assert!(decode(r#"["AUTH"]"#).is_err());
        assert!(decode(r#"["AUTH",42]"#).is_err());
    }

    #[test]
    fn test_decode_ok() {
        assert_eq!(
            decode(r#"["OK","e1",true]"#).unwrap(),
            Frame::Ok {
                event_id: "e1".into(),
                accepted: true,
                message: String::new(),
            }
        );
        assert_eq!(
            decode(r#"["OK","e1",false,"auth-required: bad signature"]"#).unwrap(),
            Frame::Ok {
                event_id: "e1".into(),
                accepted: false,
                message: "auth-required: bad signature".into(),
            }
        );
    }

    #[test]
    fn test_decode_ok_requires_status() {
        assert!(decode(r#"["OK","e1"]"#).is_err());
        assert!(decode(r#"["OK","e1","true"]"#).is_err());
    }

    #[test]
    fn test_decode_unknown_tag() {
        let err = decode(r#"["BOGUS"]"#).unwrap_err();
        assert!(err.is_decode_error());
        assert!(err.to_string().contains("BOGUS"));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(decode("").is_err());
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"type":"EVENT"}"#).is_err());
        assert!(decode("[]").is_err());
        assert!(decode("[1,2]").is_err());
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(raw in ".*") {
            let _ = decode(&raw);
        }

        #[test]
        fn prop_notice_text_survives(text in "[^\"\\\\]*") {
            let raw = serde_json::to_string(&json!(["NOTICE", text.clone()])).unwrap();
            prop_assert_eq!(decode(&raw).unwrap(), Frame::Notice { message: text });
        }
    }
}
