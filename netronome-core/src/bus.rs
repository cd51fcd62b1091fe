//! Single-publisher/many-subscriber broadcast of [`Update`] values.
//!
//! Grounded on `actors_framework::event_bus::EventBus`, which
//! wraps a `tokio::sync::broadcast` channel. The behavior on a lagging
//! subscriber differs deliberately: `EventBusListener` logs and
//! keeps reading past a `Lagged` error for non-critical events, but this bus
//! must guarantee a slow UI subscriber is fully cancelled once it falls more
//! than the backlog bound behind, so `next()` treats
//! `Lagged` as end-of-stream instead of skipping ahead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::constants::bus::SUBSCRIBER_BACKLOG;
use crate::models::update::Update;

#[derive(Clone)]
pub struct Bus {
    sender: broadcast::Sender<Update>,
    dropped: Arc<AtomicU64>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_BACKLOG);
        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Non-blocking: if there are no subscribers the update is simply dropped.
    pub fn publish(&self, update: Update) {
        let _ = self.sender.send(update);
    }

    /// Returns a [`Subscription`] delivering updates produced after this
    /// call, and a [`CancellationToken`] the caller can trigger to release
    /// the subscriber's buffer promptly.
    pub fn subscribe(&self) -> (Subscription, CancellationToken) {
        let cancel = CancellationToken::new();
        (
            Subscription {
                receiver: self.sender.subscribe(),
                cancel: cancel.clone(),
                dropped: self.dropped.clone(),
            },
            cancel,
        )
    }

    /// Total updates dropped across all subscribers that fell behind.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<Update>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Awaits the next update. Returns `None` once the subscription is
    /// cancelled, the bus is closed, or the subscriber lagged past the
    /// backlog bound.
    pub async fn next(&mut self) -> Option<Update> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                result = self.receiver.recv() => {
                    match result {
                        Ok(update) => return Some(update),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            self.dropped.fetch_add(skipped, Ordering::Relaxed);
                            self.cancel.cancel();
                            return None;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::update::{AgentStatus, Update};

    #[tokio::test]
    async fn delivers_updates_in_publish_order() {
        let bus = Bus::new();
        let (mut sub, _cancel) = bus.subscribe();

        bus.publish(Update::AgentStatus(AgentStatus {
            agent_id: 1,
            connected: true,
        }));
        bus.publish(Update::AgentStatus(AgentStatus {
            agent_id: 2,
            connected: true,
        }));

        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        match (first, second) {
            (Update::AgentStatus(a), Update::AgentStatus(b)) => {
                assert_eq!(a.agent_id, 1);
                assert_eq!(b.agent_id, 2);
            }
            _ => panic!("unexpected update variants"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_delivery() {
        let bus = Bus::new();
        let (mut sub, cancel) = bus.subscribe();
        cancel.cancel();
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn lagging_subscriber_is_cancelled_and_counted() {
        let bus = Bus::new();
        let (mut sub, _cancel) = bus.subscribe();

        for i in 0..(SUBSCRIBER_BACKLOG as i64 + 10) {
            bus.publish(Update::AgentStatus(AgentStatus {
                agent_id: i,
                connected: true,
            }));
        }

        // The subscriber is now behind by more than the backlog bound: the
        // very next receive must observe the lag and terminate, never
        // silently skipping ahead to later updates.
        assert!(sub.next().await.is_none());
        assert!(bus.dropped_count() > 0);
    }
}
