pub mod address;
pub mod connection;
pub mod outbound;

pub use address::resolve_remote_addr;
pub use connection::{Session, SessionId, WeakSession};
pub use outbound::Outbound;

#[cfg(test)]
pub(crate) mod test_support;
