//! Channel bus engine
//!
//! Multiplexes one upstream pub/sub connection across every local
//! subscriber:
//! - an upstream subscription exists for a channel iff at least one local
//!   subscriber does
//! - the upstream listener is started lazily, once per connection
//!   generation, before the first upstream subscribe
//! - publishes are delivered to local subscribers synchronously (the store
//!   does not hand our own publishes back to us) and then forwarded upstream
//!
//! Concurrency and usage notes:
//! - All mutation of the subscription map and every upstream
//!   subscribe/unsubscribe happens under one async mutex, so concurrent
//!   sessions can neither lose registrations nor double-subscribe.
//! - Message delivery snapshots the callbacks and runs them outside the
//!   lock. Upstream events are consumed by a single task, which keeps
//!   per-channel delivery order.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use super::channel::{Channel, SubscriberId};
use super::event::{BusEvent, Callback, ChannelSet, Envelope, decode_delivery};
use crate::upstream::{Upstream, UpstreamEvent, UpstreamEvents};
use crate::utils::error::BusError;

pub struct ChannelBus {
    upstream: Arc<dyn Upstream>,
    origin: String,
    state: Mutex<BusState>,
}

#[derive(Default)]
struct BusState {
    channels: HashMap<String, Channel>,
    /// Generation of the running listener, if any.
    listening: Option<u64>,
    next_generation: u64,
}

impl ChannelBus {
    pub fn new(upstream: Arc<dyn Upstream>) -> Arc<Self> {
        Arc::new(Self {
            upstream,
            origin: Uuid::new_v4().to_string(),
            state: Mutex::new(BusState::default()),
        })
    }

    /// Tag attached to every payload this bus publishes upstream.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Register `callback` for `subscriber` on every channel in `channels`.
    ///
    /// Only a channel's first local subscriber causes an upstream
    /// subscribe. If that upstream subscribe fails the registration for the
    /// channel is rolled back and the error returned; channels handled
    /// earlier in the same call stay subscribed.
    pub async fn subscribe(
        self: &Arc<Self>,
        channels: impl Into<ChannelSet>,
        subscriber: &SubscriberId,
        callback: Callback,
    ) -> Result<(), BusError> {
        let channels = channels.into();
        let mut state = self.state.lock().await;
        self.ensure_listening(&mut state).await?;

        for name in channels.iter() {
            let first = !state.channels.contains_key(name);
            let channel = state
                .channels
                .entry(name.to_string())
                .or_insert_with(|| Channel::new(name));
            if channel
                .subscribe(subscriber.clone(), Arc::clone(&callback))
                .is_some()
            {
                debug!(channel = %name, subscriber = %subscriber, "Replaced subscriber callback");
            }

            if first {
                debug!(channel = %name, "Upstream subscribe");
                if let Err(e) = self.upstream.subscribe(name).await {
                    warn!(channel = %name, error = %e, "Upstream subscribe failed");
                    state.channels.remove(name);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Remove `subscriber` from every channel in `channels`.
    ///
    /// The removed callback is invoked once more with an `Unsubscribe`
    /// event. The last subscriber leaving a channel drops the entry and
    /// unsubscribes upstream. Local removal completes for every channel
    /// even when upstream fails; the first upstream error is returned.
    pub async fn unsubscribe(
        &self,
        channels: impl Into<ChannelSet>,
        subscriber: &SubscriberId,
    ) -> Result<(), BusError> {
        let channels = channels.into();
        let mut state = self.state.lock().await;

        let mut failure = None;
        for name in channels.iter() {
            let Some(channel) = state.channels.get_mut(name) else {
                warn!(channel = %name, "Trying to unsubscribe from unknown channel");
                continue;
            };
            let Some(callback) = channel.unsubscribe(subscriber) else {
                continue;
            };
            let emptied = channel.is_empty();

            invoke(subscriber, &callback, &BusEvent::unsubscribe(name));

            if emptied {
                state.channels.remove(name);
                debug!(channel = %name, "Upstream unsubscribe");
                if let Err(e) = self.upstream.unsubscribe(name).await {
                    warn!(channel = %name, error = %e, "Upstream unsubscribe failed");
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Publish `object` to every channel in `channels`.
    ///
    /// Local subscribers receive the original object before this returns,
    /// whether or not the upstream publish succeeds. An upstream failure is
    /// reported after all channels were attempted.
    pub async fn publish(
        &self,
        channels: impl Into<ChannelSet>,
        object: Map<String, Value>,
    ) -> Result<(), BusError> {
        let channels = channels.into();
        let encoded = serde_json::to_string(&Envelope {
            origin: &self.origin,
            body: &object,
        })?;
        let body = Arc::new(Value::Object(object));

        let mut failure = None;
        for name in channels.iter() {
            let callbacks = self.callbacks_for(name).await;
            trace!(channel = %name, subscribers = callbacks.len(), "Local publish");
            fan_out(&callbacks, &BusEvent::message(name, Arc::clone(&body)));

            if let Err(e) = self.upstream.publish(name, &encoded).await {
                warn!(channel = %name, error = %e, "Upstream publish failed");
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Tear everything down: unsubscribe every channel upstream (best
    /// effort), tell every subscriber with a `Disconnect` event and forget
    /// the listener so the next subscribe reconnects.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        self.teardown(&mut state).await;
    }

    /// Number of channels with at least one local subscriber.
    pub async fn channel_count(&self) -> usize {
        self.state.lock().await.channels.len()
    }

    /// Local subscribers on `channel`, zero for an unknown channel.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .await
            .channels
            .get(channel)
            .map(Channel::len)
            .unwrap_or(0)
    }

    /// Whether `subscriber` holds a registration on `channel`.
    pub async fn is_subscribed(&self, channel: &str, subscriber: &SubscriberId) -> bool {
        self.state
            .lock()
            .await
            .channels
            .get(channel)
            .is_some_and(|c| c.contains(subscriber))
    }

    /// Whether an upstream listener is running for the current generation.
    ///
    /// False before the first subscribe and after a disconnect or `close`.
    pub async fn is_listening(&self) -> bool {
        self.state.lock().await.listening.is_some()
    }

    async fn ensure_listening(self: &Arc<Self>, state: &mut BusState) -> Result<(), BusError> {
        if state.listening.is_some() {
            return Ok(());
        }
        let events = self.upstream.listen().await?;
        state.next_generation += 1;
        let generation = state.next_generation;
        state.listening = Some(generation);
        debug!(generation, "Upstream listener started");

        tokio::spawn(listen_loop(Arc::downgrade(self), generation, events));
        Ok(())
    }

    async fn callbacks_for(&self, channel: &str) -> Vec<(SubscriberId, Callback)> {
        self.state
            .lock()
            .await
            .channels
            .get(channel)
            .map(Channel::callbacks)
            .unwrap_or_default()
    }

    async fn on_upstream_event(&self, generation: u64, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Message { channels, body } => self.on_message(channels, &body).await,
            UpstreamEvent::Subscribed { channel, count } => {
                trace!(channel = %channel, count, "Upstream subscribe acknowledged");
            }
            UpstreamEvent::Unsubscribed { channel, count } => {
                trace!(channel = %channel, count, "Upstream unsubscribe acknowledged");
            }
            UpstreamEvent::Disconnect => {
                let mut state = self.state.lock().await;
                if state.listening == Some(generation) {
                    warn!(generation, "Upstream disconnected, dropping all subscriptions");
                    self.teardown(&mut state).await;
                }
            }
        }
    }

    async fn on_message(&self, channels: Vec<String>, raw: &str) {
        let delivery = match decode_delivery(raw) {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(channels = ?channels, error = %e, "Dropping undecodable upstream payload");
                return;
            }
        };
        if delivery.origin.as_deref() == Some(self.origin.as_str()) {
            trace!(channels = ?channels, "Ignoring echo of our own publish");
            return;
        }

        let body = Arc::new(delivery.body);
        for name in ChannelSet::new(channels).iter() {
            let callbacks = self.callbacks_for(name).await;
            fan_out(&callbacks, &BusEvent::message(name, Arc::clone(&body)));
        }
    }

    async fn teardown(&self, state: &mut BusState) {
        state.listening = None;
        let channels: Vec<Channel> = state.channels.drain().map(|(_, c)| c).collect();

        for channel in &channels {
            if let Err(e) = self.upstream.unsubscribe(&channel.name).await {
                debug!(channel = %channel.name, error = %e, "Upstream unsubscribe during close failed");
            }
            fan_out(&channel.callbacks(), &BusEvent::disconnect(&channel.name));
        }
        debug!(channels = channels.len(), "Channel bus closed");
    }
}

impl std::fmt::Debug for ChannelBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBus")
            .field("origin", &self.origin)
            .finish()
    }
}

async fn listen_loop(bus: Weak<ChannelBus>, generation: u64, mut events: UpstreamEvents) {
    while let Some(event) = events.recv().await {
        let Some(bus) = bus.upgrade() else {
            return;
        };
        let disconnect = event == UpstreamEvent::Disconnect;
        bus.on_upstream_event(generation, event).await;
        if disconnect {
            return;
        }
    }
    // stream ended without an explicit disconnect
    if let Some(bus) = bus.upgrade() {
        bus.on_upstream_event(generation, UpstreamEvent::Disconnect)
            .await;
    }
}

fn fan_out(callbacks: &[(SubscriberId, Callback)], event: &BusEvent) {
    for (subscriber, callback) in callbacks {
        invoke(subscriber, callback, event);
    }
}

/// Run one callback, containing both error returns and panics.
fn invoke(subscriber: &SubscriberId, callback: &Callback, event: &BusEvent) {
    match catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(subscriber = %subscriber, channel = %event.channel, error = %e, "Subscriber callback failed");
        }
        Err(_) => {
            error!(subscriber = %subscriber, channel = %event.channel, "Subscriber callback panicked");
        }
    }
}
