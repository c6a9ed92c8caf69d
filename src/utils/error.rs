//! The `error` module defines the error types used within `relayhub`.
//!
//! Each layer owns one enum: the upstream adapters fail with
//! [`UpstreamError`], the channel bus with [`BusError`], call handlers with
//! [`CallError`]. Startup failures are collected in [`RelayError`].

use thiserror::Error;

/// Failure talking to the external pub/sub store.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream protocol error: {0}")]
    Protocol(String),

    #[error("upstream replied with an error: {0}")]
    Reply(String),

    #[error("upstream connection is closed")]
    Closed,
}

/// Failure of a channel bus operation.
///
/// `Upstream` is the "upstream unavailable" case callers are expected to
/// tell apart from local problems.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("upstream unavailable: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("session {0} is closed")]
    SessionClosed(String),
}

impl BusError {
    pub fn is_upstream(&self) -> bool {
        matches!(self, BusError::Upstream(_))
    }
}

/// A frame could not be pushed down a session's transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("session {0} is closed")]
    SessionClosed(String),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Error returned by a call handler.
///
/// `InvalidArgs` is answered with `{"args": "Invalid"}`, everything else with
/// the generic `{"call": "Server Error"}`.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Failed(String),
}

impl From<BusError> for CallError {
    fn from(err: BusError) -> Self {
        CallError::Failed(err.to_string())
    }
}

impl From<DeliveryError> for CallError {
    fn from(err: DeliveryError) -> Self {
        CallError::Failed(err.to_string())
    }
}

/// Rejected call registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("call name must not be empty")]
    EmptyName,

    #[error("call '{0}' is already registered")]
    Duplicate(String),
}

/// Invalid or unloadable settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid {field} host: '{value}'")]
    InvalidHost { field: &'static str, value: String },

    #[error("invalid {field} port: {value} (expected 1..65535)")]
    InvalidPort { field: &'static str, value: u16 },

    #[error("invalid websocket path: '{0}' (must start with '/')")]
    InvalidPath(String),
}

/// Anything that stops the relay from starting or serving.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Register(#[from] RegisterError),
}
