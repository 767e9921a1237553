//! Per-conversation publish/subscribe for newly appended messages.
//!
//! Each conversation with at least one subscriber owns a bounded tokio
//! broadcast channel. A subscriber that falls more than `capacity` events
//! behind loses the oldest ones and is told how many it missed, so it can
//! re-sync through `MessageLog::page`. Subscriptions never replay history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::Stream;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use courier_types::models::Message;

pub const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FeedError {
    #[error("change feed is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Message(Message),
    /// `n` events were dropped for this subscriber.
    Lagged(u64),
}

#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    capacity: usize,
    channels: RwLock<HashMap<Uuid, broadcast::Sender<Message>>>,
    closed: AtomicBool,
}

impl FeedInner {
    fn release(&self, conversation_id: Uuid) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = channels.get(&conversation_id) {
            if tx.receiver_count() == 0 {
                channels.remove(&conversation_id);
                debug!("Released feed channel for conversation {}", conversation_id);
            }
        }
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                capacity: capacity.max(1),
                channels: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Start receiving messages appended to `conversation_id` from now on.
    /// Dropping the returned handle unsubscribes.
    pub fn subscribe(&self, conversation_id: Uuid) -> Result<Subscription, FeedError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FeedError::Closed);
        }

        let mut channels = self.inner.channels.write().unwrap_or_else(PoisonError::into_inner);
        let rx = channels
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe();

        Ok(Subscription {
            conversation_id,
            rx: Some(rx),
            feed: self.inner.clone(),
        })
    }

    /// Deliver `message` to the conversation's current subscribers.
    /// Returns how many subscribers it reached; zero is not an error.
    pub(crate) fn publish(&self, message: &Message) -> Result<usize, FeedError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FeedError::Closed);
        }

        let channels = self.inner.channels.read().unwrap_or_else(PoisonError::into_inner);
        match channels.get(&message.conversation_id) {
            Some(tx) => Ok(tx.send(message.clone()).unwrap_or(0)),
            None => Ok(0),
        }
    }

    pub fn subscriber_count(&self, conversation_id: Uuid) -> usize {
        self.inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&conversation_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Number of conversations that currently hold a channel.
    pub fn active_conversations(&self) -> usize {
        self.inner.channels.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Stop accepting publishes and end every open subscription.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let dropped = {
            let mut channels = self.inner.channels.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *channels)
        };
        if !dropped.is_empty() {
            warn!("Change feed closed with {} live conversation channels", dropped.len());
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// A live subscription to one conversation.
pub struct Subscription {
    conversation_id: Uuid,
    rx: Option<broadcast::Receiver<Message>>,
    feed: Arc<FeedInner>,
}

impl Subscription {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Next event, or `None` once the feed has been closed.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        let rx = self.rx.as_mut()?;
        match rx.recv().await {
            Ok(message) => Some(FeedEvent::Message(message)),
            Err(RecvError::Lagged(n)) => {
                warn!(
                    "Subscriber on conversation {} lagged by {} messages",
                    self.conversation_id, n
                );
                Some(FeedEvent::Lagged(n))
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// The subscription as a stream that ends when the feed closes.
    pub fn into_stream(mut self) -> impl Stream<Item = FeedEvent> + Send {
        async_stream::stream! {
            while let Some(event) = self.recv().await {
                yield event;
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver has to go first so the count seen by release() excludes it.
        drop(self.rx.take());
        self.feed.release(self.conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_types::models::MessageType;
    use futures_util::StreamExt;

    fn message(conversation_id: Uuid, body: &str) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: Some(Uuid::new_v4()),
            content: Some(body.to_string()),
            message_type: MessageType::Text,
            media_url: None,
            media_type: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let feed = ChangeFeed::new(16);
        let cid = Uuid::new_v4();
        let mut sub = feed.subscribe(cid).unwrap();

        let first = message(cid, "one");
        let second = message(cid, "two");
        assert_eq!(feed.publish(&first), Ok(1));
        assert_eq!(feed.publish(&second), Ok(1));

        assert_eq!(sub.recv().await, Some(FeedEvent::Message(first)));
        assert_eq!(sub.recv().await, Some(FeedEvent::Message(second)));
    }

    #[tokio::test]
    async fn other_conversations_are_not_delivered() {
        let feed = ChangeFeed::new(16);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut sub = feed.subscribe(a).unwrap();

        assert_eq!(feed.publish(&message(b, "elsewhere")), Ok(0));
        let here = message(a, "here");
        feed.publish(&here).unwrap();

        assert_eq!(sub.recv().await, Some(FeedEvent::Message(here)));
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let feed = ChangeFeed::new(16);
        let cid = Uuid::new_v4();
        let _early = feed.subscribe(cid).unwrap();
        feed.publish(&message(cid, "before")).unwrap();

        let mut late = feed.subscribe(cid).unwrap();
        let after = message(cid, "after");
        feed.publish(&after).unwrap();

        assert_eq!(late.recv().await, Some(FeedEvent::Message(after)));
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_how_much_it_missed() {
        let feed = ChangeFeed::new(2);
        let cid = Uuid::new_v4();
        let mut sub = feed.subscribe(cid).unwrap();

        for i in 0..5 {
            feed.publish(&message(cid, &i.to_string())).unwrap();
        }

        assert_eq!(sub.recv().await, Some(FeedEvent::Lagged(3)));
        match sub.recv().await {
            Some(FeedEvent::Message(m)) => assert_eq!(m.content.as_deref(), Some("3")),
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn dropping_last_subscription_releases_channel() {
        let feed = ChangeFeed::new(4);
        let cid = Uuid::new_v4();

        let first = feed.subscribe(cid).unwrap();
        let second = feed.subscribe(cid).unwrap();
        assert_eq!(feed.subscriber_count(cid), 2);

        drop(first);
        assert_eq!(feed.subscriber_count(cid), 1);
        assert_eq!(feed.active_conversations(), 1);

        drop(second);
        assert_eq!(feed.subscriber_count(cid), 0);
        assert_eq!(feed.active_conversations(), 0);
    }

    #[tokio::test]
    async fn close_ends_subscriptions_and_rejects_publish() {
        let feed = ChangeFeed::new(4);
        let cid = Uuid::new_v4();
        let mut sub = feed.subscribe(cid).unwrap();

        feed.close();

        assert_eq!(sub.recv().await, None);
        assert_eq!(feed.publish(&message(cid, "late")), Err(FeedError::Closed));
        assert!(feed.subscribe(cid).is_err());
    }

    #[tokio::test]
    async fn stream_yields_events_then_ends_on_close() {
        let feed = ChangeFeed::new(4);
        let cid = Uuid::new_v4();
        let mut events = Box::pin(feed.subscribe(cid).unwrap().into_stream());

        let first = message(cid, "streamed");
        feed.publish(&first).unwrap();
        assert_eq!(events.next().await, Some(FeedEvent::Message(first)));

        feed.close();
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes() {
        let feed = ChangeFeed::new(4);
        let cid = Uuid::new_v4();
        let events = feed.subscribe(cid).unwrap().into_stream();
        assert_eq!(feed.subscriber_count(cid), 1);

        drop(events);
        assert_eq!(feed.active_conversations(), 0);
    }
}
