use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound request payload.
///
/// Serialized as `{"method": ..., "args": ..., "kwargs": ..., "message_id": ...}`.
/// `kwargs` defaults to the empty string, which is what workers on the wire
/// expect when no keyword arguments are supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub method: String,
    pub args: Value,
    #[serde(default = "empty_kwargs")]
    pub kwargs: Value,
    pub message_id: String,
}

impl RequestMessage {
    pub fn new(method: impl Into<String>, args: Value, message_id: impl Into<String>) -> Self {
        // ---
        Self {
            method: method.into(),
            args,
            kwargs: empty_kwargs(),
            message_id: message_id.into(),
        }
    }

    pub fn with_kwargs(mut self, kwargs: Value) -> Self {
        self.kwargs = kwargs;
        self
    }
}

fn empty_kwargs() -> Value {
    Value::String(String::new())
}

/// Inbound result payload.
///
/// A payload missing either field fails deserialization and is treated as a
/// poison message by the listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    pub message_id: String,
    pub result: Value,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_field_names() {
        // ---
        let req = RequestMessage::new("image-search", json!({"image_reference": "gs://b/x.jpg"}), "msg_7");
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["method"], "image-search");
        assert_eq!(value["args"]["image_reference"], "gs://b/x.jpg");
        assert_eq!(value["kwargs"], "");
        assert_eq!(value["message_id"], "msg_7");
    }

    #[test]
    fn test_result_parse() {
        // ---
        let raw = br#"{"message_id":"msg_7","result":{"label":"plastic_bottle"}}"#;
        let msg: ResultMessage = serde_json::from_slice(raw).unwrap();

        assert_eq!(msg.message_id, "msg_7");
        assert_eq!(msg.result["label"], "plastic_bottle");
    }

    #[test]
    fn test_result_missing_field_is_error() {
        // ---
        // A request-shaped payload has no "result" field; parsing it as a
        // result must fail so the listener can discard it.
        let raw = br#"{"method":"m","args":{},"kwargs":"","message_id":"x"}"#;
        assert!(serde_json::from_slice::<ResultMessage>(raw).is_err());
    }
}
