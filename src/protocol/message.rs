//! Message struct with typed constructors.
//!
//! A message is the unit carried inside one frame. Its JSON body has the
//! fields `name`, `type`, then `session` and `payload` when present:
//!
//! ```
//! use ipcbus::protocol::Message;
//! use serde_json::json;
//!
//! let msg = Message::publish("temp", Some(json!(42)));
//! assert_eq!(msg.encode().unwrap(), r#"[GLS]{"name":"temp","type":"publish","payload":42}[GLE]"#);
//!
//! let back = Message::decode(&msg.encode().unwrap()).unwrap();
//! assert_eq!(back, msg);
//! ```

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};

use super::wire_format::{encode_frame, strip_markers, END_MARKER, START_MARKER};
use crate::error::{IpcError, Result};

/// Application payload carried by a message.
///
/// Absence is modelled one level up as `Option<Payload>`, so `None` (key
/// omitted on the wire) and `Some(Value::Null)` (explicit `null`) stay distinct.
pub type Payload = serde_json::Value;

/// The closed set of message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Client asks the server to forward publishes of a topic.
    Subscribe,
    /// Client withdraws a subscription.
    Unsubscribe,
    /// Server forwards the latest value of a topic.
    Publish,
    /// One-way, best-effort notification.
    Indication,
    /// Client call that expects a correlated response.
    Request,
    /// Server answer to a request, carrying the request's session.
    Response,
}

impl MessageType {
    /// Wire literal for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::Publish => "publish",
            MessageType::Indication => "indication",
            MessageType::Request => "request",
            MessageType::Response => "response",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Topic or RPC identifier.
    pub name: String,
    /// Message type.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Correlation id, only meaningful on requests and responses.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_session"
    )]
    pub session: Option<u32>,
    /// Optional payload. `Some(Value::Null)` is sent as an explicit `null`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub payload: Option<Payload>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`; a missing key falls back
/// to `None` through `#[serde(default)]`.
fn deserialize_present<'de, D>(deserializer: D) -> std::result::Result<Option<Payload>, D::Error>
where
    D: Deserializer<'de>,
{
    Payload::deserialize(deserializer).map(Some)
}

/// A present `session` must be a non-negative integer; `null` is rejected.
fn deserialize_session<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    u32::deserialize(deserializer).map(Some)
}

impl Message {
    /// Create a message with no session and no payload.
    pub fn new(name: impl Into<String>, kind: MessageType) -> Self {
        Self {
            name: name.into(),
            kind,
            session: None,
            payload: None,
        }
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: Option<Payload>) -> Self {
        self.payload = payload;
        self
    }

    /// Set the session id.
    pub fn with_session(mut self, session: u32) -> Self {
        self.session = Some(session);
        self
    }

    /// Build a `subscribe` message.
    pub fn subscribe(name: impl Into<String>) -> Self {
        Self::new(name, MessageType::Subscribe)
    }

    /// Build an `unsubscribe` message.
    pub fn unsubscribe(name: impl Into<String>) -> Self {
        Self::new(name, MessageType::Unsubscribe)
    }

    /// Build a `publish` message.
    pub fn publish(name: impl Into<String>, payload: Option<Payload>) -> Self {
        Self::new(name, MessageType::Publish).with_payload(payload)
    }

    /// Build an `indication` message.
    pub fn indication(name: impl Into<String>, payload: Option<Payload>) -> Self {
        Self::new(name, MessageType::Indication).with_payload(payload)
    }

    /// Build a `request` message.
    pub fn request(name: impl Into<String>, session: u32, payload: Option<Payload>) -> Self {
        Self::new(name, MessageType::Request)
            .with_session(session)
            .with_payload(payload)
    }

    /// Build a `response` message.
    pub fn response(name: impl Into<String>, session: u32, payload: Option<Payload>) -> Self {
        Self::new(name, MessageType::Response)
            .with_session(session)
            .with_payload(payload)
    }

    /// Serialize into a complete text frame, markers included.
    pub fn encode(&self) -> Result<String> {
        let body = serde_json::to_string(self)?;
        Ok(format!("{START_MARKER}{body}{END_MARKER}"))
    }

    /// Serialize into frame bytes ready for a socket write.
    pub fn to_frame(&self) -> Result<Bytes> {
        let body = serde_json::to_vec(self)?;
        Ok(encode_frame(&body))
    }

    /// Parse and validate a message body.
    ///
    /// Frame markers are stripped when present. A body that is not a JSON
    /// object, any parse failure, a missing
    /// or mistyped field, or an unknown `type` yields an error; callers on the
    /// receive path drop such messages.
    pub fn decode(text: &str) -> Result<Self> {
        let body: Payload = serde_json::from_str(strip_markers(text))?;
        // Derived struct deserialization would also accept a positional array.
        if !body.is_object() {
            return Err(IpcError::Protocol("message body is not a JSON object".to_string()));
        }
        Ok(Message::deserialize(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_order_on_the_wire() {
        let msg = Message::request("add", 7, Some(json!({"a": 1})));
        assert_eq!(
            msg.encode().unwrap(),
            r#"[GLS]{"name":"add","type":"request","session":7,"payload":{"a":1}}[GLE]"#
        );
    }

    #[test]
    fn test_absent_payload_is_omitted() {
        let msg = Message::subscribe("temp");
        assert_eq!(
            msg.encode().unwrap(),
            r#"[GLS]{"name":"temp","type":"subscribe"}[GLE]"#
        );
    }

    #[test]
    fn test_null_payload_is_explicit() {
        let msg = Message::publish("temp", Some(Payload::Null));
        let text = msg.encode().unwrap();
        assert_eq!(text, r#"[GLS]{"name":"temp","type":"publish","payload":null}[GLE]"#);

        let back = Message::decode(&text).unwrap();
        assert_eq!(back.payload, Some(Payload::Null));
    }

    #[test]
    fn test_missing_payload_decodes_as_none() {
        let msg = Message::decode(r#"{"name":"x","type":"publish"}"#).unwrap();
        assert_eq!(msg.payload, None);
        assert_eq!(msg.session, None);
    }

    #[test]
    fn test_round_trip_payload_kinds() {
        let payloads = [
            None,
            Some(Payload::Null),
            Some(json!("world")),
            Some(json!(-3.5)),
            Some(json!(true)),
            Some(json!({"nested": {"list": [1, 2, 3]}})),
            Some(json!([1, "two", null])),
        ];

        for payload in payloads {
            let msg = Message::response("rpc", 9999, payload);
            let back = Message::decode(&msg.encode().unwrap()).unwrap();
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn test_to_frame_matches_encode() {
        let msg = Message::indication("ping", Some(json!("pong")));
        let frame = msg.to_frame().unwrap();
        assert_eq!(&frame[..], msg.encode().unwrap().as_bytes());
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let msg = Message::decode(r#"{"name":"x","type":"indication","extra":1}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Indication);
    }

    #[test]
    fn test_decode_rejects_invalid_bodies() {
        let invalid = [
            "",
            "not json",
            r#"{"type":"publish"}"#,
            r#"{"name":"x"}"#,
            r#"{"name":1,"type":"publish"}"#,
            r#"{"name":"x","type":"broadcast"}"#,
            r#"{"name":"x","type":7}"#,
            r#"{"name":"x","type":"request","session":"1"}"#,
            r#"{"name":"x","type":"request","session":-1}"#,
            r#"{"name":"x","type":"request","session":1.5}"#,
            r#"{"name":"x","type":"request","session":null}"#,
            r#"["name","type"]"#,
            r#"["x","publish"]"#,
            r#"["x","indication",null,"boom"]"#,
            r#""x""#,
            "42",
            "null",
        ];

        for body in invalid {
            assert!(Message::decode(body).is_err(), "should reject {body}");
        }
    }

    #[test]
    fn test_array_body_is_not_a_message() {
        let err = Message::decode(r#"["x","publish"]"#).unwrap_err();
        assert!(matches!(err, IpcError::Protocol(_)));
    }

    #[test]
    fn test_missing_session_is_none_but_null_is_invalid() {
        let msg = Message::decode(r#"{"name":"x","type":"response"}"#).unwrap();
        assert_eq!(msg.session, None);

        let msg = Message::decode(r#"{"name":"x","type":"response","session":0}"#).unwrap();
        assert_eq!(msg.session, Some(0));

        assert!(Message::decode(r#"{"name":"x","type":"response","session":null}"#).is_err());
    }

    #[test]
    fn test_message_type_literals() {
        for kind in [
            MessageType::Subscribe,
            MessageType::Unsubscribe,
            MessageType::Publish,
            MessageType::Indication,
            MessageType::Request,
            MessageType::Response,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
