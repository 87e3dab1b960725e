//! JSON command/response wire format.
//!
//! A request carries `{message_id, command, args}`. Over the WebSocket the
//! server answers with `{message_id, result}` or `{message_id, error_code,
//! details}`, pushes `{event, object_id, data}` messages at any time, and
//! opens every connection with a server-info message. The HTTP endpoint
//! accepts the same request shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EnsembleError, EnsembleResult};

/// A command sent to the server.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommandMessage {
    pub message_id: String,
    pub command: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

impl CommandMessage {
    /// Creates a command with a fresh message id.
    pub fn new(command: impl Into<String>, args: Value) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            command: command.into(),
            args,
        }
    }
}

/// Greeting the server sends as the first message on every connection.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerInfo {
    pub server_id: String,
    #[serde(default)]
    pub server_version: String,
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Whether the session must authenticate before issuing commands.
    #[serde(default)]
    pub requires_auth: bool,
}

/// Any message received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Successful response to a command.
    Result { message_id: String, result: Value },
    /// Error response; `message_id` is absent for connection-level errors.
    Error {
        message_id: Option<String>,
        code: i64,
        details: String,
    },
    /// Server-initiated event.
    Event {
        event: String,
        object_id: Option<String>,
        data: Value,
    },
    /// Connection greeting.
    ServerInfo(ServerInfo),
}

impl ServerMessage {
    /// Parses a text frame.
    ///
    /// # Errors
    /// Returns `Protocol` if the frame is not a JSON object of a known shape.
    pub fn parse(text: &str) -> EnsembleResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(obj) = value else {
            return Err(EnsembleError::Protocol(format!(
                "expected JSON object, got: {}",
                truncate(text)
            )));
        };

        let message_id = obj
            .get("message_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        if obj.contains_key("error_code") {
            let (code, details) = error_fields(&obj);
            return Ok(Self::Error {
                message_id,
                code,
                details,
            });
        }

        if let Some(event) = obj.get("event").and_then(Value::as_str) {
            return Ok(Self::Event {
                event: event.to_string(),
                object_id: obj
                    .get("object_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                data: obj.get("data").cloned().unwrap_or(Value::Null),
            });
        }

        if obj.contains_key("server_id") {
            let info: ServerInfo = serde_json::from_value(Value::Object(obj))?;
            return Ok(Self::ServerInfo(info));
        }

        match message_id {
            Some(message_id) => Ok(Self::Result {
                message_id,
                result: obj.get("result").cloned().unwrap_or(Value::Null),
            }),
            None => Err(EnsembleError::Protocol(format!(
                "unrecognized message: {}",
                truncate(text)
            ))),
        }
    }
}

/// Unwraps an HTTP command response body.
///
/// A body with `error_code` is an error, a body with `result` yields that
/// value, and any other JSON is taken as the result itself.
pub fn unwrap_response(body: Value) -> EnsembleResult<Value> {
    match body {
        Value::Object(mut obj) => {
            if obj.contains_key("error_code") {
                let (code, details) = error_fields(&obj);
                return Err(EnsembleError::from_server(code, details));
            }
            match obj.remove("result") {
                Some(result) => Ok(result),
                None => Ok(Value::Object(obj)),
            }
        }
        other => Ok(other),
    }
}

fn error_fields(obj: &Map<String, Value>) -> (i64, String) {
    let code = match obj.get("error_code") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        _ => 0,
    };
    let details = match obj.get("details") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::from("unknown error"),
        Some(other) => other.to_string(),
    };
    (code, details)
}

fn truncate(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_omits_null_args() {
        let cmd = CommandMessage::new("players/all", Value::Null);
        let text = serde_json::to_string(&cmd).unwrap();
        assert!(!text.contains("args"));
        assert!(text.contains("\"command\":\"players/all\""));
    }

    #[test]
    fn command_ids_are_unique() {
        let a = CommandMessage::new("x", Value::Null);
        let b = CommandMessage::new("x", Value::Null);
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn parses_result() {
        let msg = ServerMessage::parse(r#"{"message_id":"1","result":[1,2]}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Result {
                message_id: "1".into(),
                result: json!([1, 2])
            }
        );
    }

    #[test]
    fn parses_error_with_string_code() {
        let msg =
            ServerMessage::parse(r#"{"message_id":"7","error_code":"4","details":"gone"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Error {
                message_id: Some("7".into()),
                code: 4,
                details: "gone".into()
            }
        );
    }

    #[test]
    fn parses_event() {
        let msg = ServerMessage::parse(
            r#"{"event":"player_updated","object_id":"kitchen","data":{"player_id":"kitchen"}}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::Event {
                event, object_id, ..
            } => {
                assert_eq!(event, "player_updated");
                assert_eq!(object_id.as_deref(), Some("kitchen"));
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn parses_server_info() {
        let msg = ServerMessage::parse(
            r#"{"server_id":"abc","server_version":"2.7.0","schema_version":28,"requires_auth":true}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::ServerInfo(info) => {
                assert_eq!(info.server_id, "abc");
                assert!(info.requires_auth);
            }
            other => panic!("expected server info, got {:?}", other),
        }
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            ServerMessage::parse("[1,2,3]"),
            Err(EnsembleError::Protocol(_))
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"foo":1}"#),
            Err(EnsembleError::Protocol(_))
        ));
    }

    #[test]
    fn unwrap_response_variants() {
        assert_eq!(
            unwrap_response(json!({"result": {"access_token": "abc"}})).unwrap(),
            json!({"access_token": "abc"})
        );
        assert_eq!(
            unwrap_response(json!({"server_id": "x"})).unwrap(),
            json!({"server_id": "x"})
        );
        assert!(matches!(
            unwrap_response(json!({"error_code": 20, "details": "bad login"})),
            Err(EnsembleError::Auth(_))
        ));
    }
}
