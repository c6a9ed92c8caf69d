//! Channel management
//!
//! A `Channel` holds the local subscribers of one channel name, each with
//! the callback the bus invokes on delivery. A subscriber has at most one
//! callback per channel; subscribing again replaces it.
//!
//! Concurrency note: callers must synchronize access to `Channel` (the bus
//! keeps every channel behind its state lock).

use std::collections::HashMap;

use super::event::Callback;

pub type SubscriberId = String;

pub struct Channel {
    pub name: String,
    subscribers: HashMap<SubscriberId, Callback>,
}

impl Channel {
    /// Create a new channel with no subscribers.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashMap::new(),
        }
    }

    /// Register `callback` for `id`, returning the callback it replaced.
    pub fn subscribe(&mut self, id: SubscriberId, callback: Callback) -> Option<Callback> {
        self.subscribers.insert(id, callback)
    }

    /// Remove a subscriber, returning its callback if it was registered.
    pub fn unsubscribe(&mut self, id: &SubscriberId) -> Option<Callback> {
        self.subscribers.remove(id)
    }

    /// Whether `id` is subscribed to this channel.
    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.subscribers.contains_key(id)
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// True once the last subscriber has left; the bus then drops the
    /// channel and unsubscribes upstream.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Snapshot of the current subscribers, so delivery can run without
    /// holding the bus lock.
    pub fn callbacks(&self) -> Vec<(SubscriberId, Callback)> {
        self.subscribers
            .iter()
            .map(|(id, cb)| (id.clone(), cb.clone()))
            .collect()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.keys().collect::<Vec<_>>())
            .finish()
    }
}
