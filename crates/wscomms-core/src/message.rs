//! Message and wire frame types.
//!
//! A [`Message`] is what application code sends and receives: a non-empty
//! name plus an opaque JSON payload. A [`Frame`] is the wire envelope that
//! carries one message over one WebSocket text frame, tagged with the route
//! it belongs to and optionally the name of the sender that produced it.
//!
//! ```json
//! {"route": "/test_route", "msg": "welcome", "data": "Hello from client", "sender": "default_sender"}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, WsError};

/// An application-level message: a name and a type-erased payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "msg")]
    name: String,
    #[serde(default)]
    data: Value,
}

impl Message {
    /// Create a message. The name must be non-empty.
    pub fn new(name: impl Into<String>, data: impl Into<Value>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(WsError::InvalidMessage("message name is empty".into()));
        }
        Ok(Self {
            name,
            data: data.into(),
        })
    }

    /// Create a message whose payload is any serializable value.
    pub fn from_serializable<T: Serialize>(name: impl Into<String>, data: &T) -> Result<Self> {
        let value =
            serde_json::to_value(data).map_err(|e| WsError::InvalidMessage(e.to_string()))?;
        Self::new(name, value)
    }

    /// Message name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw payload.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Payload as a string slice, if it is a JSON string.
    pub fn data_str(&self) -> Option<&str> {
        self.data.as_str()
    }

    /// Deserialize the payload into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(WsError::from)
    }

    /// Split into name and payload.
    pub fn into_parts(self) -> (String, Value) {
        (self.name, self.data)
    }
}

/// Wire envelope: one message bound to a route.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Route path the message is addressed to.
    pub route: String,
    /// The carried message (flattened into `msg` / `data`).
    #[serde(flatten)]
    pub message: Message,
    /// Name of the sender that produced the frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl Frame {
    /// Build a frame for `route`.
    pub fn new(route: impl Into<String>, message: Message, sender: Option<String>) -> Self {
        Self {
            route: route.into(),
            message,
            sender,
        }
    }

    /// Serialize to the JSON text carried by one WebSocket frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| WsError::InvalidMessage(e.to_string()))
    }

    /// Parse one WebSocket text frame.
    ///
    /// Fails with [`WsError::Decode`] when the text is not a JSON object with
    /// a non-empty `route` and `msg`.
    pub fn decode(text: &str) -> Result<Self> {
        let frame: Self = serde_json::from_str(text)?;
        if frame.route.is_empty() {
            return Err(WsError::Decode("frame route is empty".into()));
        }
        if frame.message.name.is_empty() {
            return Err(WsError::Decode("frame message name is empty".into()));
        }
        Ok(frame)
    }

    /// Parse a binary frame holding UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| WsError::Decode(format!("binary frame is not UTF-8: {e}")))?;
        Self::decode(text)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn empty_name_rejected() {
        let err = Message::new("", "x").unwrap_err();
        assert_matches!(err, WsError::InvalidMessage(_));
    }

    #[test]
    fn wire_shape_uses_msg_key() {
        let msg = Message::new("welcome", "Hello from client").unwrap();
        let frame = Frame::new("/test_route", msg, Some("default_sender".into()));
        let parsed: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(parsed["route"], "/test_route");
        assert_eq!(parsed["msg"], "welcome");
        assert_eq!(parsed["data"], "Hello from client");
        assert_eq!(parsed["sender"], "default_sender");
    }

    #[test]
    fn sender_omitted_when_none() {
        let frame = Frame::new("/r", Message::new("ping", Value::Null).unwrap(), None);
        let text = frame.encode().unwrap();
        assert!(!text.contains("sender"));
    }

    #[test]
    fn decode_missing_data_defaults_to_null() {
        let frame = Frame::decode(r#"{"route":"/r","msg":"hello"}"#).unwrap();
        assert_eq!(frame.message.data(), &Value::Null);
        assert!(frame.sender.is_none());
    }

    #[test]
    fn decode_rejects_non_object() {
        assert_matches!(Frame::decode("[1,2,3]"), Err(WsError::Decode(_)));
        assert_matches!(Frame::decode("not json"), Err(WsError::Decode(_)));
        assert_matches!(Frame::decode(""), Err(WsError::Decode(_)));
    }

    #[test]
    fn decode_rejects_missing_fields() {
        assert_matches!(Frame::decode(r#"{"msg":"x"}"#), Err(WsError::Decode(_)));
        assert_matches!(Frame::decode(r#"{"route":"/r"}"#), Err(WsError::Decode(_)));
    }

    #[test]
    fn decode_rejects_empty_route_and_name() {
        assert_matches!(
            Frame::decode(r#"{"route":"","msg":"x"}"#),
            Err(WsError::Decode(_))
        );
        assert_matches!(
            Frame::decode(r#"{"route":"/r","msg":""}"#),
            Err(WsError::Decode(_))
        );
    }

    #[test]
    fn decode_bytes_rejects_invalid_utf8() {
        assert_matches!(Frame::decode_bytes(&[0xff, 0xfe]), Err(WsError::Decode(_)));
    }

    #[test]
    fn typed_payload_helpers() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Position {
            x: i32,
            y: i32,
        }
        let msg = Message::from_serializable("pos", &Position { x: 3, y: -1 }).unwrap();
        assert_eq!(msg.data(), &json!({"x": 3, "y": -1}));
        let back: Position = msg.data_as().unwrap();
        assert_eq!(back, Position { x: 3, y: -1 });
        assert_matches!(msg.data_as::<String>(), Err(WsError::Decode(_)));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            ".*".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::hash_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn frame_roundtrip(
            route in "/[a-z_]{1,12}",
            name in "[a-zA-Z0-9_.]{1,16}",
            data in arb_json(),
            sender in proptest::option::of("[a-z_]{1,12}"),
        ) {
            let frame = Frame::new(route, Message::new(name, data).unwrap(), sender);
            let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, frame);
        }
    }
}
