//! Outbound half of a session
//!
//! `Outbound` is the cheap, cloneable handle bus callbacks capture to push
//! frames at a client. It does not keep the session itself alive.

use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;

use crate::transport::message::Reply;
use crate::utils::error::DeliveryError;

#[derive(Debug, Clone)]
pub struct Outbound {
    session: String,
    sender: UnboundedSender<WsMessage>,
}

impl Outbound {
    pub fn new(session: String, sender: UnboundedSender<WsMessage>) -> Self {
        Self { session, sender }
    }

    /// Successful answer to the request `id`.
    pub fn reply(&self, id: &str, fields: Map<String, Value>) -> Result<(), DeliveryError> {
        self.send(Reply::success(id, fields))
    }

    /// Failed answer to the request `id`.
    pub fn error(&self, id: &str, fields: Map<String, Value>) -> Result<(), DeliveryError> {
        self.send(Reply::failure(id, fields))
    }

    /// Unsolicited push; `name` takes the place of the request id.
    pub fn event(&self, name: &str, fields: Map<String, Value>) -> Result<(), DeliveryError> {
        self.send(Reply::success(name, fields))
    }

    pub fn send(&self, reply: Reply) -> Result<(), DeliveryError> {
        let text = reply.to_frame()?;
        self.sender
            .send(WsMessage::text(text))
            .map_err(|_| DeliveryError::SessionClosed(self.session.clone()))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
