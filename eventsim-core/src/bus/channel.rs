//! Broadcast channel backing the bus

use super::error::BusError;
use super::message::BusMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A payload in flight on the bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusEnvelope {
    /// Channel name
    pub channel: String,

    /// Message content (JSON)
    pub payload: Value,

    /// Sender identifier
    pub from: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Message ID
    pub message_id: Uuid,
}

impl BusEnvelope {
    /// Wrap a payload for sending
    pub fn new(channel: impl Into<String>, payload: Value, from: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload,
            from: from.into(),
            timestamp: Utc::now(),
            message_id: Uuid::new_v4(),
        }
    }
}

/// Named broadcast channel shared by both execution contexts.
///
/// Cloning yields another sender on the same channel.
#[derive(Debug, Clone)]
pub struct MessageBus {
    name: String,
    sender: broadcast::Sender<BusEnvelope>,
}

impl MessageBus {
    /// Create a bus. Each subscriber buffers up to `capacity` messages.
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self, BusError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BusError::InvalidChannel(
                "channel name cannot be empty".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(BusError::InvalidChannel(format!(
                "channel {} needs a non-zero capacity",
                name
            )));
        }
        let (sender, _) = broadcast::channel(capacity);
        Ok(Self { name, sender })
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish a typed message.
    ///
    /// Returns how many subscribers the message was handed to; zero means it
    /// was dropped.
    pub fn publish(&self, from: &str, message: &BusMessage) -> Result<usize, BusError> {
        let payload = serde_json::to_value(message)?;
        Ok(self.publish_raw(from, payload))
    }

    /// Publish an arbitrary JSON payload
    pub fn publish_raw(&self, from: &str, payload: Value) -> usize {
        let envelope = BusEnvelope::new(self.name.clone(), payload, from);
        match self.sender.send(envelope) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::debug!(channel = %self.name, "No subscribers, message dropped");
                0
            }
        }
    }

    /// Subscribe to messages published from now on
    pub fn subscribe(&self) -> BusSubscription {
        BusSubscription {
            id: Uuid::new_v4(),
            channel: self.name.clone(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving end of a bus subscription
#[derive(Debug)]
pub struct BusSubscription {
    id: Uuid,
    channel: String,
    receiver: broadcast::Receiver<BusEnvelope>,
}

impl BusSubscription {
    /// Subscription ID
    pub fn id(&self) -> &Uuid {
        &self.id
    }

    /// Channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message.
    ///
    /// Messages lost to lag are logged and skipped. Returns `None` once every
    /// sender is gone.
    pub async fn recv(&mut self) -> Option<BusEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        channel = %self.channel,
                        skipped,
                        "Subscriber lagged, messages dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take a message if one is already queued
    pub fn try_recv(&mut self) -> Result<Option<BusEnvelope>, BusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.channel, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(BusError::Closed(self.channel.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_empty_name_and_zero_capacity() {
        assert!(MessageBus::new("", 8).is_err());
        assert!(MessageBus::new("bus", 0).is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = MessageBus::new("bus", 8).unwrap();
        let delivered = bus
            .publish("app", &BusMessage::event_source_url("/e"))
            .unwrap();
        assert_eq!(delivered, 0);

        // A late subscriber never sees it
        let mut sub = bus.subscribe();
        assert!(sub.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn fifo_per_sender_and_fan_out() {
        let bus = MessageBus::new("bus", 8).unwrap();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        for i in 0..3 {
            bus.publish_raw("app", json!({ "seq": i }));
        }

        for sub in [&mut first, &mut second] {
            for i in 0..3 {
                let envelope = sub.recv().await.unwrap();
                assert_eq!(envelope.payload["seq"], i);
                assert_eq!(envelope.channel, "bus");
                assert_eq!(envelope.from, "app");
            }
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_oldest() {
        let bus = MessageBus::new("bus", 2).unwrap();
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish_raw("app", json!({ "seq": i }));
        }

        assert_eq!(sub.recv().await.unwrap().payload["seq"], 3);
        assert_eq!(sub.recv().await.unwrap().payload["seq"], 4);
    }

    #[tokio::test]
    async fn recv_ends_when_all_senders_dropped() {
        let bus = MessageBus::new("bus", 2).unwrap();
        let mut sub = bus.subscribe();
        drop(bus);
        assert!(sub.recv().await.is_none());
    }
}
