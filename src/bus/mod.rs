pub mod channel;
pub mod engine;
pub mod event;

pub use channel::{Channel, SubscriberId};
pub use engine::ChannelBus;
pub use event::{BusEvent, Callback, ChannelSet, EventKind};

#[cfg(test)]
mod tests;
