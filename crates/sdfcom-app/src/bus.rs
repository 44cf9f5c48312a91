/// In-process publish/subscribe bus for chat records
use async_stream::stream;
use futures::stream::{self, Stream};
use sdfcom_types::ChatRecord;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Records published on one channel, in publish order
pub type RecordStream = Pin<Box<dyn Stream<Item = ChatRecord> + Send>>;

/// Default number of records buffered per subscriber
pub const DEFAULT_BUS_CAPACITY: usize = 256;

pub trait MessageBus: Send + Sync {
    /// Publish under `record.channel`; returns how many subscribers got it
    fn publish(&self, record: ChatRecord) -> usize;

    /// Records published on `channel` from now on. The stream ends when the
    /// bus is closed.
    fn subscribe(&self, channel: &str) -> RecordStream;

    /// End all subscriptions and drop further publishes
    fn close(&self);
}

/// Broadcast-channel bus keyed by channel name
pub struct MemoryBus {
    senders: Mutex<HashMap<String, broadcast::Sender<ChatRecord>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    fn senders(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<ChatRecord>>> {
        self.senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for MemoryBus {
    fn publish(&self, record: ChatRecord) -> usize {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Bus closed; dropping record from {}", record.username);
            return 0;
        }
        let senders = self.senders();
        match senders.get(&record.channel) {
            // send only fails when nobody is subscribed
            Some(sender) => sender.send(record).unwrap_or(0),
            None => 0,
        }
    }

    fn subscribe(&self, channel: &str) -> RecordStream {
        if self.closed.load(Ordering::SeqCst) {
            return Box::pin(stream::empty());
        }

        let mut receiver = self
            .senders()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        let channel = channel.to_string();

        Box::pin(stream! {
            loop {
                match receiver.recv().await {
                    Ok(record) => yield record,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscriber on {} fell behind; {} records dropped", channel, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.senders().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use sdfcom_types::ChatMessage;

    fn record(channel: &str, user: &str, content: &str) -> ChatRecord {
        ChatRecord::from_message(channel, ChatMessage::new(user, content))
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = MemoryBus::new();
        assert_eq!(bus.publish(record("sdfshell", "ann", "hi")), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = MemoryBus::new();
        let mut first = bus.subscribe("sdfshell");
        let mut second = bus.subscribe("sdfshell");

        assert_eq!(bus.publish(record("sdfshell", "ann", "one")), 2);
        assert_eq!(bus.publish(record("sdfshell", "ben", "two")), 2);

        for stream in [&mut first, &mut second] {
            assert_eq!(stream.next().await.unwrap().content, "one");
            assert_eq!(stream.next().await.unwrap().content, "two");
        }
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = MemoryBus::new();
        let mut other = bus.subscribe("elsewhere");
        let mut ours = bus.subscribe("sdfshell");

        bus.publish(record("sdfshell", "ann", "hi"));
        bus.close();

        assert_eq!(ours.next().await.unwrap().username, "ann");
        assert!(ours.next().await.is_none());
        assert!(other.next().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_bus_drops_everything() {
        let bus = MemoryBus::new();
        bus.close();
        let mut late = bus.subscribe("sdfshell");
        assert_eq!(bus.publish(record("sdfshell", "ann", "hi")), 0);
        assert!(late.next().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_skips_ahead() {
        let bus = MemoryBus::with_capacity(2);
        let slow = bus.subscribe("sdfshell");
        for i in 0..5 {
            bus.publish(record("sdfshell", "ann", &i.to_string()));
        }
        bus.close();

        let seen: Vec<String> = slow.map(|r| r.content).collect().await;
        assert_eq!(seen, vec!["3", "4"]);
    }
}
