//! Message-bus link boundary.
//!
//! The broker client itself is an external integration; the service talks
//! to it through the [`Bus`] trait only. Implementations must keep
//! `publish` non-blocking, deliver subscribed messages in publication
//! order per topic, and reconnect with exponential backoff while reporting
//! [`LinkStatus::Disconnected`]; `wait_for` bounds startup on that state.
//!
//! [`LocalBus`] is the in-process implementation used for local cluster
//! runs and tests: a topic-matching fan-out with MQTT wildcard semantics.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

pub trait Bus: Send + Sync {
    /// Publishes one payload. Returns false when the message could not be
    /// handed to the link; the caller logs and drops that single message.
    fn publish(&self, topic: &str, payload: &str) -> bool;

    /// Registers a subscription. Matching messages arrive on the returned
    /// channel until the bus is dropped.
    fn subscribe(&self, filter: &str) -> Receiver<BusMessage>;

    fn status(&self) -> LinkStatus;

    /// Blocks until the link reaches `status` or the timeout expires.
    fn wait_for(&self, status: LinkStatus, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_millis(50);
        while self.status() != status {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(Duration::from_secs(2));
        }
        true
    }
}

/// MQTT-style topic filter matching: `+` matches one level, a trailing `#`
/// matches any remainder.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// In-process broker: every published message is fanned out to all
/// matching subscriptions. Always connected.
#[derive(Default)]
pub struct LocalBus {
    subscriptions: Mutex<Vec<(String, Sender<BusMessage>)>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bus for LocalBus {
    fn publish(&self, topic: &str, payload: &str) -> bool {
        let subscriptions = self.subscriptions.lock().unwrap();
        for (filter, sender) in subscriptions.iter() {
            if topic_matches(filter, topic) {
                let _ = sender.send(BusMessage {
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                });
            }
        }
        true
    }

    fn subscribe(&self, filter: &str) -> Receiver<BusMessage> {
        let (tx, rx) = unbounded();
        self.subscriptions
            .lock()
            .unwrap()
            .push((filter.to_string(), tx));
        rx
    }

    fn status(&self) -> LinkStatus {
        LinkStatus::Connected
    }
}
