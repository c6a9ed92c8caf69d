//! Wire format
//!
//! Inbound: `{"id": <string>, "call": <string>, "args": {...}}`, exactly
//! those three keys.
//! Outbound: the reply fields plus `id` and `_` (1 success, 0 failure).

use serde_json::{Map, Value};
use thiserror::Error;

/// Most arguments a single call may carry.
pub const MAX_ARGS: usize = 20;

const REQUEST_KEYS: [&str; 3] = ["id", "call", "args"];

/// A frame that passed the syntax checks. `call` and `args` are checked
/// by the dispatcher, which can answer them since `id` is known.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: String,
    pub call: Value,
    pub args: Value,
}

/// Frames rejected before an id is known. These are dropped without reply.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not an object")]
    NotAnObject,

    #[error("frame keys must be exactly id, call, args (got {0:?})")]
    Keys(Vec<String>),

    #[error("frame id is not a string")]
    Id,
}

pub fn parse_frame(text: &str) -> Result<Request, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut map) = value else {
        return Err(FrameError::NotAnObject);
    };
    if map.len() != REQUEST_KEYS.len() || !REQUEST_KEYS.iter().all(|k| map.contains_key(*k)) {
        return Err(FrameError::Keys(map.keys().cloned().collect()));
    }

    let id = match map.remove("id") {
        Some(Value::String(id)) => id,
        _ => return Err(FrameError::Id),
    };
    Ok(Request {
        id,
        call: map.remove("call").unwrap_or(Value::Null),
        args: map.remove("args").unwrap_or(Value::Null),
    })
}

/// Symbolic failure reasons sent back to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidArgs,
    TooManyArgs,
    UnknownCall,
    ServerError,
}

impl Rejection {
    pub fn fields(self) -> Map<String, Value> {
        let (key, reason) = match self {
            Rejection::InvalidArgs => ("args", "Invalid"),
            Rejection::TooManyArgs => ("args", "Too Many"),
            Rejection::UnknownCall => ("call", "Unknown"),
            Rejection::ServerError => ("call", "Server Error"),
        };
        let mut fields = Map::new();
        fields.insert(key.to_string(), Value::String(reason.to_string()));
        fields
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: String,
    pub ok: bool,
    pub fields: Map<String, Value>,
}

impl Reply {
    pub fn success(id: &str, fields: Map<String, Value>) -> Self {
        Self {
            id: id.to_string(),
            ok: true,
            fields,
        }
    }

    pub fn failure(id: &str, fields: Map<String, Value>) -> Self {
        Self {
            id: id.to_string(),
            ok: false,
            fields,
        }
    }

    pub fn rejected(id: &str, rejection: Rejection) -> Self {
        Self::failure(id, rejection.fields())
    }

    /// Serialize to one text frame. `id` and `_` win over same-named fields.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        let mut object = self.fields.clone();
        object.insert("id".to_string(), Value::String(self.id.clone()));
        object.insert("_".to_string(), Value::from(u8::from(self.ok)));
        serde_json::to_string(&object)
    }
}
