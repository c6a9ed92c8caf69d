//! RPC routing from inbound frames to registered call handlers.

pub mod args;
pub mod router;

pub use args::Args;
pub use router::{CallResult, CallTable, Dispatcher, FnHandler, Handler, handler_fn};
