use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Any JSON number, echoed back exactly as received
    Number(serde_json::Number),
    String(String),
}

impl RequestId {
    /// The id as an unsigned integer, if it is one.
    ///
    /// Outbound calls are always numbered, so only numeric ids can ever match
    /// a pending call.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RequestId::Number(n) => n.as_u64(),
            RequestId::String(_) => None,
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id.into())
    }
}

impl From<serde_json::Number> for RequestId {
    fn from(id: serde_json::Number) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// One unit exchanged between peers.
///
/// Exactly one shape per message. Raw input is classified by
/// [`Message::from_value`], which checks field presence rather than field
/// truthiness, so `id: 0` and `result: null` are ordinary values.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Result {
        id: RequestId,
        result: Value,
    },
    Error {
        id: RequestId,
        error: RpcError,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

/// Why a raw value could not be classified as a [`Message`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("invalid id: {0}")]
    InvalidId(Value),

    #[error("method must be a string")]
    InvalidMethod,

    #[error("invalid error payload: {0}")]
    InvalidError(String),

    #[error("message has no method, result or error")]
    MissingPayload,

    #[error("response has no id")]
    MissingId,

    #[error("message carries more than one of method, result and error")]
    Ambiguous,
}

impl Message {
    /// Build a Call. A `null` params value is sent as absent.
    pub fn call(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Message::Call {
            id: id.into(),
            method: method.into(),
            params: non_null(params),
        }
    }

    pub fn result(id: impl Into<RequestId>, result: Value) -> Self {
        Message::Result {
            id: id.into(),
            result,
        }
    }

    pub fn error(id: impl Into<RequestId>, error: RpcError) -> Self {
        Message::Error {
            id: id.into(),
            error,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Message::Notification {
            method: method.into(),
            params: non_null(params),
        }
    }

    /// Classify a raw JSON value.
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let Value::Object(mut obj) = value else {
            return Err(MessageError::NotAnObject);
        };

        let id = obj.remove("id").map(parse_id).transpose()?;
        let method = obj.remove("method");
        let result = obj.remove("result");
        let error = obj.remove("error");
        let params = obj.remove("params").and_then(non_null);

        match (id, method, result, error) {
            (None, Some(method), None, None) => Ok(Message::Notification {
                method: parse_method(method)?,
                params,
            }),
            (None, None, None, None) => Err(MessageError::MissingPayload),
            (None, None, _, _) => Err(MessageError::MissingId),
            (None, Some(_), _, _) => Err(MessageError::Ambiguous),
            (Some(id), Some(method), None, None) => Ok(Message::Call {
                id,
                method: parse_method(method)?,
                params,
            }),
            (Some(id), None, Some(result), None) => Ok(Message::Result { id, result }),
            (Some(id), None, None, Some(error)) => Ok(Message::Error {
                id,
                error: serde_json::from_value(error)
                    .map_err(|e| MessageError::InvalidError(e.to_string()))?,
            }),
            (Some(_), None, None, None) => Err(MessageError::MissingPayload),
            (Some(_), _, _, _) => Err(MessageError::Ambiguous),
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Call { id, .. } | Message::Result { id, .. } | Message::Error { id, .. } => {
                Some(id)
            }
            Message::Notification { .. } => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Call { method, .. } | Message::Notification { method, .. } => Some(method),
            Message::Result { .. } | Message::Error { .. } => None,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Call { .. } => "call",
            Message::Result { .. } => "result",
            Message::Error { .. } => "error",
            Message::Notification { .. } => "notification",
        }
    }
}

fn non_null(value: Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

fn parse_id(value: Value) -> Result<RequestId, MessageError> {
    serde_json::from_value(value.clone()).map_err(|_| MessageError::InvalidId(value))
}

fn parse_method(value: Value) -> Result<String, MessageError> {
    match value {
        Value::String(method) => Ok(method),
        _ => Err(MessageError::InvalidMethod),
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a RpcError>,
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut envelope = Envelope {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match self {
            Message::Call { id, method, params } => {
                envelope.id = Some(id);
                envelope.method = Some(method);
                envelope.params = params.as_ref();
            }
            Message::Result { id, result } => {
                envelope.id = Some(id);
                envelope.result = Some(result);
            }
            Message::Error { id, error } => {
                envelope.id = Some(id);
                envelope.error = Some(error);
            }
            Message::Notification { method, params } => {
                envelope.method = Some(method);
                envelope.params = params.as_ref();
            }
        }
        envelope.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(serde::de::Error::custom)
    }
}
