//! Chat
//!
//! Calls: `chat.join {token}`, `chat.part {token}`, `chat.sendmsg {token,
//! text}`. A token names the chat a client sees; it currently maps 1:1 to
//! the bus channel. Deliveries are pushed as `chat.msg` events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{fields, method};
use crate::bus::BusEvent;
use crate::dispatcher::{Args, CallResult, CallTable};
use crate::session::{Outbound, Session};
use crate::utils::error::{CallError, DeliveryError, RegisterError};

/// Session slot holding [`ChatUserState`].
pub const STATE_SLOT: &str = "chat";

/// Event name for pushed chat messages.
pub const MESSAGE_EVENT: &str = "chat.msg";

#[derive(Debug, Default)]
pub struct ChatUserState {
    pub name: Option<String>,
    pub token_to_channel: HashMap<String, String>,
    pub channel_to_token: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TokenArgs {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SendArgs {
    token: String,
    text: String,
}

#[derive(Debug, Default)]
pub struct ChatApp;

impl ChatApp {
    pub fn install(calls: &mut CallTable) -> Result<(), RegisterError> {
        let app = Arc::new(ChatApp);
        calls.register("chat.join", method(&app, ChatApp::join))?;
        calls.register("chat.part", method(&app, ChatApp::part))?;
        calls.register("chat.sendmsg", method(&app, ChatApp::sendmsg))?;
        info!("Configured chat application");
        Ok(())
    }

    /// Whether `session` may join `channel`. Everyone may, for now.
    pub fn may_join(&self, _session: &Session, _channel: &str) -> bool {
        true
    }

    /// Whether `session` may post to `channel`. Everyone may, for now.
    pub fn may_post(&self, _session: &Session, _channel: &str) -> bool {
        true
    }

    pub fn has_state(session: &Session) -> bool {
        session.has_state(STATE_SLOT)
    }

    pub fn state(session: &Session) -> Arc<Mutex<ChatUserState>> {
        session.state::<ChatUserState>(STATE_SLOT)
    }

    fn channel_for(session: &Session, token: &str) -> String {
        Self::state(session)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token_to_channel
            .get(token)
            .cloned()
            .unwrap_or_else(|| token.to_string())
    }

    async fn join(self: Arc<Self>, session: Session, args: Args) -> CallResult {
        let TokenArgs { token } = args.bind()?;
        let channel = Self::channel_for(&session, &token);
        if !self.may_join(&session, &channel) {
            return Err(CallError::Failed(format!("join of '{channel}' refused")));
        }

        session.subscribe(&channel, on_message).await?;
        {
            let state = Self::state(&session);
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.token_to_channel.insert(token.clone(), channel.clone());
            state.channel_to_token.insert(channel, token.clone());
        }
        debug!(session = %session.id(), token = %token, "Joined chat");

        Ok(Some(fields(json!({ "token": token, "join": true }))))
    }

    async fn part(self: Arc<Self>, session: Session, args: Args) -> CallResult {
        let TokenArgs { token } = args.bind()?;
        let channel = Self::channel_for(&session, &token);

        session.unsubscribe(&channel).await?;
        {
            let state = Self::state(&session);
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.token_to_channel.remove(&token);
            state.channel_to_token.remove(&channel);
        }
        debug!(session = %session.id(), token = %token, "Left chat");

        Ok(Some(fields(json!({ "token": token, "part": true }))))
    }

    async fn sendmsg(self: Arc<Self>, session: Session, args: Args) -> CallResult {
        let SendArgs { token, text } = args.bind()?;
        let channel = Self::channel_for(&session, &token);
        if !self.may_post(&session, &channel) {
            return Err(CallError::Failed(format!("post to '{channel}' refused")));
        }

        session
            .publish(channel.as_str(), fields(json!({ "text": text })))
            .await?;

        Ok(Some(fields(json!({ "token": token, "sent": true }))))
    }
}

fn on_message(outbound: &Outbound, event: &BusEvent) -> Result<(), DeliveryError> {
    if !event.is_message() {
        return Ok(());
    }
    outbound.event(
        MESSAGE_EVENT,
        fields(json!({ "channel": event.channel, "body": event.body_value() })),
    )
}
