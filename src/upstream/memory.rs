//! In-process upstream
//!
//! Behaves like a single-node store: nothing is echoed back to the
//! publishing process. Every call is recorded so tests can assert on the
//! exact upstream traffic, and `deliver`/`disconnect` let them play the
//! part of other processes.

use std::collections::BTreeSet;
use std::io;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedSender};

use super::{Upstream, UpstreamEvent, UpstreamEvents};
use crate::utils::error::UpstreamError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCall {
    Listen,
    Subscribe(String),
    Unsubscribe(String),
    Publish(String, String),
}

#[derive(Debug, Default)]
pub struct MemoryUpstream {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    listener: Option<UnboundedSender<UpstreamEvent>>,
    subscribed: BTreeSet<String>,
    calls: Vec<UpstreamCall>,
    offline: bool,
}

impl MemoryUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<UpstreamCall> {
        self.state().calls.clone()
    }

    pub fn subscribe_count(&self, channel: &str) -> usize {
        self.count(|call| matches!(call, UpstreamCall::Subscribe(c) if c == channel))
    }

    pub fn unsubscribe_count(&self, channel: &str) -> usize {
        self.count(|call| matches!(call, UpstreamCall::Unsubscribe(c) if c == channel))
    }

    pub fn listen_count(&self) -> usize {
        self.count(|call| matches!(call, UpstreamCall::Listen))
    }

    /// Payloads published to `channel`, in order.
    pub fn published(&self, channel: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                UpstreamCall::Publish(c, payload) if c == channel => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.state().subscribed.contains(channel)
    }

    /// Make every following call fail as if the store were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Push a payload as if another process had published it. Only channels
    /// currently subscribed are addressed; returns whether anything was sent.
    pub fn deliver(&self, channels: &[&str], body: &str) -> bool {
        let state = self.state();
        let targets: Vec<String> = channels
            .iter()
            .filter(|c| state.subscribed.contains(**c))
            .map(|c| c.to_string())
            .collect();
        if targets.is_empty() {
            return false;
        }
        match &state.listener {
            Some(listener) => listener
                .send(UpstreamEvent::Message {
                    channels: targets,
                    body: body.to_string(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Drop the listener connection: subscriptions are lost and a
    /// `Disconnect` event is pushed.
    pub fn disconnect(&self) {
        let mut state = self.state();
        state.subscribed.clear();
        if let Some(listener) = state.listener.take() {
            let _ = listener.send(UpstreamEvent::Disconnect);
        }
    }

    fn count(&self, pred: impl Fn(&UpstreamCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    fn check_online(state: &MemoryState) -> Result<(), UpstreamError> {
        if state.offline {
            Err(UpstreamError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory upstream is offline",
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Upstream for MemoryUpstream {
    async fn listen(&self) -> Result<UpstreamEvents, UpstreamError> {
        let mut state = self.state();
        Self::check_online(&state)?;
        let (tx, rx) = mpsc::unbounded_channel();
        state.listener = Some(tx);
        state.calls.push(UpstreamCall::Listen);
        Ok(rx)
    }

    async fn subscribe(&self, channel: &str) -> Result<(), UpstreamError> {
        let mut state = self.state();
        Self::check_online(&state)?;
        let Some(listener) = state.listener.clone() else {
            return Err(UpstreamError::Closed);
        };
        state.calls.push(UpstreamCall::Subscribe(channel.to_string()));
        state.subscribed.insert(channel.to_string());
        let count = state.subscribed.len() as i64;
        let _ = listener.send(UpstreamEvent::Subscribed {
            channel: channel.to_string(),
            count,
        });
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), UpstreamError> {
        let mut state = self.state();
        Self::check_online(&state)?;
        state.calls.push(UpstreamCall::Unsubscribe(channel.to_string()));
        state.subscribed.remove(channel);
        let count = state.subscribed.len() as i64;
        if let Some(listener) = &state.listener {
            let _ = listener.send(UpstreamEvent::Unsubscribed {
                channel: channel.to_string(),
                count,
            });
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), UpstreamError> {
        let mut state = self.state();
        Self::check_online(&state)?;
        state
            .calls
            .push(UpstreamCall::Publish(channel.to_string(), payload.to_string()));
        Ok(())
    }
}
