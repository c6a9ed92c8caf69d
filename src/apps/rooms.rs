//! Rooms: `room.join {room}`, `room.part {room}`, `room.send {room, msg}`.
//! Deliveries are pushed as `rooms.msg` events.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{fields, method};
use crate::bus::BusEvent;
use crate::dispatcher::{Args, CallResult, CallTable};
use crate::session::{Outbound, Session};
use crate::utils::error::{DeliveryError, RegisterError};

pub const MESSAGE_EVENT: &str = "rooms.msg";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoomArgs {
    room: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SendArgs {
    room: String,
    msg: String,
}

#[derive(Debug, Default)]
pub struct RoomsApp;

impl RoomsApp {
    pub fn install(calls: &mut CallTable) -> Result<(), RegisterError> {
        let app = Arc::new(RoomsApp);
        calls.register("room.join", method(&app, RoomsApp::join))?;
        calls.register("room.part", method(&app, RoomsApp::part))?;
        calls.register("room.send", method(&app, RoomsApp::send))?;
        info!("Configured rooms application");
        Ok(())
    }

    async fn join(self: Arc<Self>, session: Session, args: Args) -> CallResult {
        let RoomArgs { room } = args.bind()?;
        session.subscribe(&room, on_message).await?;
        Ok(Some(fields(json!({ "room": room, "join": true }))))
    }

    async fn part(self: Arc<Self>, session: Session, args: Args) -> CallResult {
        let RoomArgs { room } = args.bind()?;
        session.unsubscribe(&room).await?;
        Ok(Some(fields(json!({ "room": room, "part": true }))))
    }

    async fn send(self: Arc<Self>, session: Session, args: Args) -> CallResult {
        let SendArgs { room, msg } = args.bind()?;
        session
            .publish(room.as_str(), fields(json!({ "body": msg })))
            .await?;
        Ok(Some(fields(json!({ "room": room, "sent": true }))))
    }
}

fn on_message(outbound: &Outbound, event: &BusEvent) -> Result<(), DeliveryError> {
    if !event.is_message() {
        return Ok(());
    }
    outbound.event(MESSAGE_EVENT, fields(json!({ "message": event.body_value() })))
}
