//! # relayhub
//!
//! `relayhub` is a real-time message relay. Browser clients hold one
//! WebSocket each and make RPC-style calls over it; calls subscribe the
//! client to channels or publish to them. All local subscriptions are
//! multiplexed over a single upstream pub/sub connection (Redis), so any
//! number of relay processes can share the same channels.
//!
//! ## Core Modules
//!
//! - `upstream`: the interface to the external pub/sub store, with a Redis
//!   client and an in-process implementation.
//! - `bus`: the channel bus, multiplexing one upstream connection across
//!   every local subscriber.
//! - `session`: per-client state (subscriptions, state slots, cleanups).
//! - `dispatcher`: frame validation and routing of calls to handlers.
//! - `apps`: the bundled applications (`chat`, `rooms`, `echo`).
//! - `transport`: the wire format and the WebSocket server.
//! - `server`: the composition root tying everything together.
//! - `config`: settings from file, environment and command line.
//! - `utils`: error types and logging setup.

pub mod apps;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod server;
pub mod session;
pub mod transport;
pub mod upstream;
pub mod utils;

pub use server::Server;
