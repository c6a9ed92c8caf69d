use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::utils::error::DeliveryError;

/// Callback registered by a local subscriber.
///
/// Runs synchronously on the delivering task; an `Err` (or a panic) is
/// logged by the bus and does not affect other subscribers.
pub type Callback = Arc<dyn Fn(&BusEvent) -> Result<(), DeliveryError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A published payload.
    Message,
    /// The subscriber was removed from the channel.
    Unsubscribe,
    /// The upstream connection dropped and the channel was torn down.
    Disconnect,
}

/// What a subscriber callback is invoked with.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub kind: EventKind,
    pub channel: String,
    pub body: Option<Arc<Value>>,
}

impl BusEvent {
    pub fn message(channel: &str, body: Arc<Value>) -> Self {
        Self {
            kind: EventKind::Message,
            channel: channel.to_string(),
            body: Some(body),
        }
    }

    pub fn unsubscribe(channel: &str) -> Self {
        Self {
            kind: EventKind::Unsubscribe,
            channel: channel.to_string(),
            body: None,
        }
    }

    pub fn disconnect(channel: &str) -> Self {
        Self {
            kind: EventKind::Disconnect,
            channel: channel.to_string(),
            body: None,
        }
    }

    pub fn is_message(&self) -> bool {
        self.kind == EventKind::Message
    }

    /// The body, or `null` for events that carry none.
    pub fn body_value(&self) -> Value {
        self.body.as_deref().cloned().unwrap_or(Value::Null)
    }
}

/// One channel name or several, deduplicated in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSet(Vec<String>);

impl ChannelSet {
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for channel in channels {
            let channel = channel.into();
            if !names.contains(&channel) {
                names.push(channel);
            }
        }
        Self(names)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ChannelSet {
    fn from(channel: &str) -> Self {
        Self(vec![channel.to_string()])
    }
}

impl From<String> for ChannelSet {
    fn from(channel: String) -> Self {
        Self(vec![channel])
    }
}

impl From<&String> for ChannelSet {
    fn from(channel: &String) -> Self {
        Self(vec![channel.clone()])
    }
}

impl From<Vec<String>> for ChannelSet {
    fn from(channels: Vec<String>) -> Self {
        Self::new(channels)
    }
}

impl From<Vec<&str>> for ChannelSet {
    fn from(channels: Vec<&str>) -> Self {
        Self::new(channels)
    }
}

impl From<&[&str]> for ChannelSet {
    fn from(channels: &[&str]) -> Self {
        Self::new(channels.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for ChannelSet {
    fn from(channels: [&str; N]) -> Self {
        Self::new(channels)
    }
}

/// Envelope key carrying the publishing process's origin tag. Chosen so
/// that payloads from other publishers are not mistaken for envelopes.
pub(crate) const ORIGIN_KEY: &str = "__relay_origin";
/// Envelope key carrying the published object.
pub(crate) const BODY_KEY: &str = "__relay_body";

/// Wire form of a payload sent upstream. The origin tag lets a process
/// drop its own publishes when the store echoes them back.
#[derive(Serialize)]
pub(crate) struct Envelope<'a> {
    #[serde(rename = "__relay_origin")]
    pub origin: &'a str,
    #[serde(rename = "__relay_body")]
    pub body: &'a Map<String, Value>,
}

/// A payload received from upstream.
#[derive(Debug, PartialEq)]
pub(crate) struct Delivery {
    pub origin: Option<String>,
    pub body: Value,
}

/// Decode an upstream payload. Anything that is not exactly an envelope,
/// including payloads published by other tools, is taken as the body
/// itself.
pub(crate) fn decode_delivery(raw: &str) -> Result<Delivery, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;
    match value {
        Value::Object(mut map)
            if map.len() == 2
                && map.get(ORIGIN_KEY).is_some_and(Value::is_string)
                && map.contains_key(BODY_KEY) =>
        {
            let origin = map
                .remove(ORIGIN_KEY)
                .and_then(|o| o.as_str().map(str::to_owned));
            let body = map.remove(BODY_KEY).unwrap_or(Value::Null);
            Ok(Delivery { origin, body })
        }
        other => Ok(Delivery {
            origin: None,
            body: other,
        }),
    }
}
