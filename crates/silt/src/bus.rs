//! Non-durable in-process fan-out for document mutations.
//!
//! Emitted synchronously from `save`/`delete`, keyed by `{col}.{kind}` and
//! `{col}.{id}.{kind}`. No persistence, no cursors, no replay; use the change
//! feed when delivery must survive restarts.

use serde_json::Value;
use silt_core::EventKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// A mutation notification as seen by light-bus subscribers.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub collection: String,
    pub id: String,
    pub kind: EventKind,
    /// Unix milliseconds of the write.
    pub date: i64,
    /// The written document; absent for deletes.
    pub data: Option<Value>,
}

impl BusEvent {
    fn keys(&self) -> [String; 2] {
        [
            format!("{}.{}", self.collection, self.kind),
            format!("{}.{}.{}", self.collection, self.id, self.kind),
        ]
    }
}

type Callback = Box<dyn Fn(&BusEvent) + Send + Sync>;

/// Handle returned by [`LightBus::subscribe`]; pass back to unsubscribe.
#[derive(Debug)]
pub struct BusSubscription {
    key: String,
    token: u64,
}

#[derive(Default)]
pub struct LightBus {
    handlers: RwLock<HashMap<String, Vec<(u64, Callback)>>>,
    next_token: AtomicU64,
}

impl LightBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a key (`{col}.{kind}` or `{col}.{id}.{kind}`).
    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F) -> BusSubscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let key = key.into();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push((token, Box::new(callback)));
        BusSubscription { key, token }
    }

    pub fn unsubscribe(&self, subscription: BusSubscription) {
        let mut handlers = self.handlers.write().unwrap();
        if let Some(list) = handlers.get_mut(&subscription.key) {
            list.retain(|(token, _)| *token != subscription.token);
            if list.is_empty() {
                handlers.remove(&subscription.key);
            }
        }
    }

    /// Invoke every callback registered for the event's keys, synchronously.
    pub fn publish(&self, event: &BusEvent) {
        let handlers = self.handlers.read().unwrap();
        for key in event.keys() {
            if let Some(list) = handlers.get(&key) {
                for (_, callback) in list {
                    callback(event);
                }
            }
        }
    }
}
