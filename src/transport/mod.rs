//! The `transport` module is responsible for network communication with
//! clients over WebSockets.
//!
//! It defines the frame format exchanged with clients and implements the
//! WebSocket server itself: accepting upgrades on the configured path,
//! pumping frames in and out of each session and shutting connections down
//! with the server.

pub mod message;
pub mod websocket;

pub use websocket::WsTransport;
