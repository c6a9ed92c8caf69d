//! Per-client session
//!
//! A `Session` is everything the relay knows about one connected client:
//! its resolved address, the channels it is subscribed to, application
//! state slots, cleanup callbacks and the outbound frame sender.
//!
//! Concurrency notes:
//! - `Session` is a cheap clone over shared state; handlers and the
//!   transport pumps all hold the same session.
//! - `close()` is guarded by an atomic flag. The membership lock is held
//!   across bus calls, so a subscribe racing with `close()` either lands
//!   before the drain (and is drained) or sees the closed flag.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::{Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use super::outbound::Outbound;
use crate::bus::{BusEvent, Callback, ChannelBus, ChannelSet, SubscriberId};
use crate::utils::error::{BusError, DeliveryError};

pub type SessionId = SubscriberId;

type Cleanup = Box<dyn FnOnce() + Send>;
type Slot = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

/// Non-owning handle; lets the write pump close a session without keeping
/// it alive.
#[derive(Clone)]
pub struct WeakSession {
    inner: Weak<Inner>,
}

struct Inner {
    id: SessionId,
    remote_addr: String,
    outbound: Outbound,
    bus: Arc<ChannelBus>,
    channels: AsyncMutex<HashSet<String>>,
    slots: Mutex<HashMap<String, Slot>>,
    cleanups: Mutex<Vec<Cleanup>>,
    closed: AtomicBool,
}

impl Session {
    pub fn new(
        bus: Arc<ChannelBus>,
        remote_addr: impl Into<String>,
        sender: UnboundedSender<WsMessage>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            inner: Arc::new(Inner {
                outbound: Outbound::new(id.clone(), sender),
                id,
                remote_addr: remote_addr.into(),
                bus,
                channels: AsyncMutex::new(HashSet::new()),
                slots: Mutex::new(HashMap::new()),
                cleanups: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.inner.remote_addr
    }

    pub fn outbound(&self) -> &Outbound {
        &self.inner.outbound
    }

    pub fn bus(&self) -> &Arc<ChannelBus> {
        &self.inner.bus
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe this session to `channel`.
    ///
    /// `on_event` runs for every bus event on the channel with the
    /// session's outbound handle. Subscribing again to the same channel
    /// replaces the previous callback.
    pub async fn subscribe<F>(&self, channel: &str, on_event: F) -> Result<(), BusError>
    where
        F: Fn(&Outbound, &BusEvent) -> Result<(), DeliveryError> + Send + Sync + 'static,
    {
        let mut channels = self.inner.channels.lock().await;
        if self.is_closed() {
            return Err(BusError::SessionClosed(self.inner.id.clone()));
        }

        let outbound = self.inner.outbound.clone();
        let callback: Callback = Arc::new(move |event: &BusEvent| on_event(&outbound, event));
        self.inner
            .bus
            .subscribe(channel, &self.inner.id, callback)
            .await?;

        channels.insert(channel.to_string());
        debug!(session = %self.inner.id, channel = %channel, "Session subscribed");
        Ok(())
    }

    /// Leave `channel`. Leaving a channel the session is not in is a no-op.
    pub async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        let mut channels = self.inner.channels.lock().await;
        if !channels.remove(channel) {
            debug!(session = %self.inner.id, channel = %channel, "Not subscribed, ignoring unsubscribe");
            return Ok(());
        }
        self.inner.bus.unsubscribe(channel, &self.inner.id).await?;
        debug!(session = %self.inner.id, channel = %channel, "Session unsubscribed");
        Ok(())
    }

    /// Publish through the bus. Membership of the target channels is not
    /// required.
    pub async fn publish(
        &self,
        channels: impl Into<ChannelSet>,
        object: Map<String, Value>,
    ) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::SessionClosed(self.inner.id.clone()));
        }
        self.inner.bus.publish(channels, object).await
    }

    pub async fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.inner.channels.lock().await.iter().cloned().collect();
        channels.sort();
        channels
    }

    pub async fn is_subscribed(&self, channel: &str) -> bool {
        self.inner.channels.lock().await.contains(channel)
    }

    pub fn reply(&self, id: &str, fields: Map<String, Value>) -> Result<(), DeliveryError> {
        self.inner.outbound.reply(id, fields)
    }

    pub fn error(&self, id: &str, fields: Map<String, Value>) -> Result<(), DeliveryError> {
        self.inner.outbound.error(id, fields)
    }

    pub fn event(&self, name: &str, fields: Map<String, Value>) -> Result<(), DeliveryError> {
        self.inner.outbound.event(name, fields)
    }

    /// Register a callback to run when the session closes. Callbacks run in
    /// registration order; one added after close runs immediately.
    pub fn add_cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut cleanups = lock(&self.inner.cleanups);
        if self.is_closed() {
            drop(cleanups);
            run_cleanup(&self.inner.id, Box::new(cleanup));
            return;
        }
        cleanups.push(Box::new(cleanup));
    }

    /// State slot `slot`, created with `T::default()` on first access.
    ///
    /// A slot holding a different type is replaced.
    pub fn state<T>(&self, slot: &str) -> Arc<Mutex<T>>
    where
        T: Default + Send + 'static,
    {
        let mut slots = lock(&self.inner.slots);
        if let Some(existing) = slots.get(slot) {
            match Arc::clone(existing).downcast::<Mutex<T>>() {
                Ok(state) => return state,
                Err(_) => {
                    warn!(session = %self.inner.id, slot = %slot, "State slot holds another type, replacing");
                }
            }
        }
        let state = Arc::new(Mutex::new(T::default()));
        slots.insert(slot.to_string(), state.clone() as Slot);
        state
    }

    pub fn has_state(&self, slot: &str) -> bool {
        lock(&self.inner.slots).contains_key(slot)
    }

    pub fn remove_state(&self, slot: &str) -> bool {
        lock(&self.inner.slots).remove(slot).is_some()
    }

    /// Tear the session down. Only the first call does anything: cleanup
    /// callbacks run in order, then every remaining channel is left.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(session = %self.inner.id, remote = %self.inner.remote_addr, "Closing session");

        let cleanups = std::mem::take(&mut *lock(&self.inner.cleanups));
        for cleanup in cleanups {
            run_cleanup(&self.inner.id, cleanup);
        }

        let drained: Vec<String> = {
            let mut channels = self.inner.channels.lock().await;
            let drained: Vec<String> = channels.drain().collect();
            if let Err(e) = self.inner.bus.unsubscribe(ChannelSet::new(&drained), &self.inner.id).await {
                warn!(session = %self.inner.id, error = %e, "Failed to drain subscriptions");
            }
            drained
        };
        debug!(session = %self.inner.id, channels = drained.len(), "Session closed");

        lock(&self.inner.slots).clear();
    }
}

impl WeakSession {
    pub fn upgrade(&self) -> Option<Session> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn run_cleanup(session: &str, cleanup: Cleanup) {
    if catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
        error!(session = %session, "Cleanup callback panicked");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
