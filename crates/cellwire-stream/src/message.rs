//! Wire messages.
//!
//! Every message is a JSON array whose first element names its kind:
//!
//! ```text
//! ["register_block", serial, url, interfaces]
//! ["register_cell",  serial, url, description, initial]
//! ["value",          serial, value]
//! ["value_append",   serial, items]
//! ["delete",         serial]
//! ["done",           message_id]
//! ["error",          message_id, reason]
//! ```
//!
//! The only inbound command is `["set", serial, value, message_id]`.

use serde_json::{Value, json};

use crate::error::ProtocolError;

/// Per-connection identifier of a registered object or cell. Serial 0 is
/// the connection's root reference.
pub type Serial = u64;

pub const ROOT_SERIAL: Serial = 0;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    RegisterBlock {
        serial: Serial,
        url: String,
        interfaces: Vec<String>,
    },
    RegisterCell {
        serial: Serial,
        url: String,
        description: Value,
        initial: Value,
    },
    Value {
        serial: Serial,
        value: Value,
    },
    ValueAppend {
        serial: Serial,
        items: Value,
    },
    Delete {
        serial: Serial,
    },
    Done {
        message_id: Value,
    },
    Error {
        message_id: Value,
        reason: String,
    },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterBlock { .. } => "register_block",
            Self::RegisterCell { .. } => "register_cell",
            Self::Value { .. } => "value",
            Self::ValueAppend { .. } => "value_append",
            Self::Delete { .. } => "delete",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Value {
        let kind = self.kind();
        match self {
            Self::RegisterBlock {
                serial,
                url,
                interfaces,
            } => json!([kind, serial, url, interfaces]),
            Self::RegisterCell {
                serial,
                url,
                description,
                initial,
            } => json!([kind, serial, url, description, initial]),
            Self::Value { serial, value } => json!([kind, serial, value]),
            Self::ValueAppend { serial, items } => json!([kind, serial, items]),
            Self::Delete { serial } => json!([kind, serial]),
            Self::Done { message_id } => json!([kind, message_id]),
            Self::Error { message_id, reason } => json!([kind, message_id, reason]),
        }
    }
}

/// A client request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set {
        serial: Serial,
        value: Value,
        message_id: Value,
    },
}

impl Command {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let parsed: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let Value::Array(parts) = parsed else {
            return Err(ProtocolError::Malformed("expected a JSON array".into()));
        };
        let Some(name) = parts.first().and_then(Value::as_str) else {
            return Err(ProtocolError::Malformed("missing command name".into()));
        };
        match name {
            "set" => {
                let serial = parts
                    .get(1)
                    .and_then(Value::as_u64)
                    .ok_or_else(|| ProtocolError::Malformed("set needs a serial".into()))?;
                let value = parts
                    .get(2)
                    .cloned()
                    .ok_or_else(|| ProtocolError::Malformed("set needs a value".into()))?;
                let message_id = parts.get(3).cloned().unwrap_or(Value::Null);
                Ok(Self::Set {
                    serial,
                    value,
                    message_id,
                })
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_encode_as_tagged_arrays() {
        let m = Message::RegisterBlock {
            serial: 1,
            url: "/t/radio".into(),
            interfaces: vec![],
        };
        assert_eq!(m.to_json(), json!(["register_block", 1, "/t/radio", []]));
        assert_eq!(
            Message::Error {
                message_id: json!(4),
                reason: "nope".into()
            }
            .to_json(),
            json!(["error", 4, "nope"])
        );
    }

    #[test]
    fn parses_set_with_and_without_message_id() {
        assert_eq!(
            Command::parse(r#"["set", 2, 2.0, 7]"#).unwrap(),
            Command::Set {
                serial: 2,
                value: json!(2.0),
                message_id: json!(7)
            }
        );
        assert!(matches!(
            Command::parse(r#"["set", 2, "x"]"#).unwrap(),
            Command::Set { message_id: Value::Null, .. }
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(Command::parse("{}"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(Command::parse("[\"set\"]"), Err(ProtocolError::Malformed(_))));
        assert_eq!(
            Command::parse(r#"["poke", 1]"#),
            Err(ProtocolError::UnknownCommand("poke".into()))
        );
    }
}
