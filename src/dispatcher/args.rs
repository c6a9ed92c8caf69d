use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::utils::error::CallError;

/// Arguments of one call, already checked to be an object of at most
/// [`MAX_ARGS`](crate::transport::message::MAX_ARGS) entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Map<String, Value>);

impl Args {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Bind the arguments to a parameter struct.
    ///
    /// Declare the struct with `#[serde(deny_unknown_fields)]` so extra
    /// arguments are rejected along with missing or mistyped ones.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, CallError> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| CallError::InvalidArgs(e.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Args {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
