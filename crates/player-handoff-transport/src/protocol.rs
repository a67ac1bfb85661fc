//! Wire protocol shared by every context on a channel.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Any message posted on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WireMessage {
    /// A request (or a fire-and-forget notice).
    #[serde(rename = "message")]
    Request(RequestMessage),
    /// The single response to a request.
    #[serde(rename = "messageResponse")]
    Response(ResponseMessage),
}

impl WireMessage {
    /// Serialize for posting.
    ///
    /// # Errors
    /// Returns error if the payload is not transmissible as JSON.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Parse a posted payload.
    ///
    /// # Errors
    /// Returns error if the payload is not a wire message.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Request for `action_name`. `message_id` is unique per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    pub message_id: String,
    pub action_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RequestMessage {
    /// Create a request with a fresh message id.
    #[must_use]
    pub fn new(action_name: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            action_name: action_name.into(),
            data,
        }
    }
}

/// Failure reported by the responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub name: String,
    pub message: String,
}

impl ErrorPayload {
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Response correlated to a request by `request_message_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    pub request_message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ResponseMessage {
    #[must_use]
    pub fn success(request_message_id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            request_message_id: request_message_id.into(),
            data,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(request_message_id: impl Into<String>, error: ErrorPayload) -> Self {
        Self {
            request_message_id: request_message_id.into(),
            data: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_wire_shape() {
        let request = RequestMessage {
            message_id: "m-1".to_string(),
            action_name: "player.seekToTime".to_string(),
            data: Some(json!(42.5)),
        };
        let json = serde_json::to_value(WireMessage::Request(request)).unwrap();
        assert_eq!(
            json,
            json!({"kind": "message", "messageId": "m-1", "actionName": "player.seekToTime", "data": 42.5})
        );
    }

    #[test]
    fn error_response_wire_shape() {
        let response = ResponseMessage::failure("m-1", ErrorPayload::new("TimeoutError", "too slow"));
        let json = serde_json::to_value(WireMessage::Response(response)).unwrap();
        assert_eq!(
            json,
            json!({
                "kind": "messageResponse",
                "requestMessageId": "m-1",
                "error": {"name": "TimeoutError", "message": "too slow"}
            })
        );
    }

    #[test]
    fn response_without_data_parses() {
        let parsed =
            WireMessage::decode(br#"{"kind":"messageResponse","requestMessageId":"m-2"}"#).unwrap();
        assert_eq!(parsed, WireMessage::Response(ResponseMessage::success("m-2", None)));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(WireMessage::decode(br#"{"kind":"gossip","messageId":"x"}"#).is_err());
    }

    #[test]
    fn message_ids_are_unique() {
        let a = RequestMessage::new("player.play", None);
        let b = RequestMessage::new("player.play", None);
        assert_ne!(a.message_id, b.message_id);
    }
}
