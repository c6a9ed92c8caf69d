//! Helpers for driving sessions in unit tests without a socket.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;
use tungstenite::protocol::Message as WsMessage;

use super::Session;
use crate::bus::ChannelBus;
use crate::upstream::MemoryUpstream;

pub(crate) fn memory_bus() -> (Arc<ChannelBus>, Arc<MemoryUpstream>) {
    let upstream = Arc::new(MemoryUpstream::new());
    let bus = ChannelBus::new(upstream.clone());
    (bus, upstream)
}

/// A session whose outbound frames land in the returned receiver.
pub(crate) fn session(bus: &Arc<ChannelBus>) -> (Session, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Session::new(Arc::clone(bus), "127.0.0.1", tx), rx)
}

pub(crate) fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Next outbound frame, decoded.
pub(crate) async fn next_frame(rx: &mut UnboundedReceiver<WsMessage>) -> Value {
    let message = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("session sender dropped");
    decode(message)
}

/// Outbound frame already queued, if any.
pub(crate) fn try_frame(rx: &mut UnboundedReceiver<WsMessage>) -> Option<Value> {
    rx.try_recv().ok().map(decode)
}

fn decode(message: WsMessage) -> Value {
    let text = message.into_text().expect("expected a text frame");
    serde_json::from_str(text.as_str()).expect("frame is not json")
}
