//! An in-process provider for local development and tests.
//!
//! Topics fan out to every attached subscription. Messages wait in a per-subscription
//! backlog until pulled or streamed, and are then leased until acknowledged. A lease
//! ends when its ack deadline passes, when the stream it went to is dropped, or when the
//! acknowledge call fails; the message then goes back to the backlog for redelivery.

use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use futures::{channel::mpsc, StreamExt};

use crate::{
    error::BackendError,
    model::{MessageId, PubsubMessage, PubsubMessageToPublish, SubscriptionName, TopicName},
    provider::{MessageStream, PubSubProvider},
};

/// Same as the Pub/Sub default for new subscriptions.
const DEFAULT_ACK_DEADLINE: Duration = Duration::from_secs(10);

pub struct MemoryProvider {
    state: Mutex<State>,
    ack_deadline: Duration,
    publish_calls: AtomicUsize,
    fail_acks: AtomicBool,
}

#[derive(Default)]
struct State {
    next_message_id: u64,
    next_stream_id: u64,
    topics: BTreeSet<TopicName>,
    subscriptions: HashMap<SubscriptionName, Subscription>,
    failing_acks: HashSet<SubscriptionName>,
    acked: Vec<(SubscriptionName, MessageId)>,
}

struct Lease {
    message: PubsubMessage,
    /// The stream the message was sent to, if it was not pulled.
    stream_id: Option<u64>,
    expires_at: Instant,
}

struct Subscription {
    name: SubscriptionName,
    /// `None` once the topic has been deleted.
    topic: Option<TopicName>,
    backlog: VecDeque<PubsubMessage>,
    outstanding: HashMap<String, Lease>,
    streams: Vec<(u64, mpsc::UnboundedSender<PubsubMessage>)>,
    deliveries: u64,
}

impl Subscription {
    fn new(name: SubscriptionName, topic: TopicName) -> Self {
        Self {
            name,
            topic: Some(topic),
            backlog: VecDeque::new(),
            outstanding: HashMap::new(),
            streams: Vec::new(),
            deliveries: 0,
        }
    }

    /// Every delivery gets its own ack id, so acking a stale delivery never acks a newer one.
    fn lease(
        &mut self,
        mut message: PubsubMessage,
        stream_id: Option<u64>,
        ack_deadline: Duration,
    ) -> PubsubMessage {
        self.deliveries += 1;
        message.ack_id = format!("{}/{}/{}", self.name, message.id, self.deliveries);
        self.outstanding.insert(
            message.ack_id.clone(),
            Lease {
                message: message.clone(),
                stream_id,
                expires_at: Instant::now() + ack_deadline,
            },
        );
        message
    }

    fn deliver(&mut self, message: PubsubMessage, ack_deadline: Duration) {
        self.streams.retain(|(_, tx)| !tx.is_closed());

        let Some(stream_id) = self.streams.first().map(|(id, _)| *id) else {
            self.backlog.push_back(message);
            return;
        };

        let leased = self.lease(message, Some(stream_id), ack_deadline);
        let sent = self.streams[0].1.unbounded_send(leased);
        if let Err(err) = sent {
            let message = err.into_inner();
            self.outstanding.remove(&message.ack_id);
            self.backlog.push_back(message);
        }
    }

    fn pull(&mut self, max_messages: usize, ack_deadline: Duration) -> Vec<PubsubMessage> {
        let count = max_messages.min(self.backlog.len());
        let messages: Vec<PubsubMessage> = self.backlog.drain(..count).collect();

        messages
            .into_iter()
            .map(|message| self.lease(message, None, ack_deadline))
            .collect()
    }

    /// Ends the given leases and puts their messages back at the front of the backlog.
    fn requeue(&mut self, ack_ids: &[String]) {
        let mut messages: Vec<PubsubMessage> = ack_ids
            .iter()
            .filter_map(|ack_id| self.outstanding.remove(ack_id))
            .map(|lease| lease.message)
            .collect();
        sort_by_publish_order(&mut messages);

        for message in messages.into_iter().rev() {
            self.backlog.push_front(message);
        }
    }

    /// Redelivers messages whose lease expired or whose stream is gone.
    fn reclaim(&mut self, ack_deadline: Duration) {
        self.streams.retain(|(_, tx)| !tx.is_closed());
        let open: HashSet<u64> = self.streams.iter().map(|(id, _)| *id).collect();
        let now = Instant::now();

        let stale: Vec<String> = self
            .outstanding
            .iter()
            .filter(|(_, lease)| {
                lease.expires_at <= now
                    || lease.stream_id.is_some_and(|id| !open.contains(&id))
            })
            .map(|(ack_id, _)| ack_id.clone())
            .collect();

        let mut messages: Vec<PubsubMessage> = stale
            .iter()
            .filter_map(|ack_id| self.outstanding.remove(ack_id))
            .map(|lease| lease.message)
            .collect();
        sort_by_publish_order(&mut messages);

        for message in messages {
            self.deliver(message, ack_deadline);
        }
    }
}

fn sort_by_publish_order(messages: &mut [PubsubMessage]) {
    messages.sort_by_key(|message| message.id.parse::<u64>().unwrap_or(u64::MAX));
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::with_ack_deadline(DEFAULT_ACK_DEADLINE)
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ack_deadline(ack_deadline: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ack_deadline,
            publish_calls: AtomicUsize::new(0),
            fail_acks: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent acknowledge call fail until switched off again.
    pub fn fail_acks(&self, fail: bool) {
        self.fail_acks.store(fail, Ordering::SeqCst);
    }

    /// Makes acknowledge calls for `sub_name` fail.
    pub fn fail_acks_for(&self, sub_name: &SubscriptionName) {
        self.lock().failing_acks.insert(sub_name.clone());
    }

    /// Number of publish calls issued, successful or not.
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    /// Every acknowledged delivery, in acknowledgement order.
    pub fn acknowledged(&self) -> Vec<(SubscriptionName, MessageId)> {
        self.lock().acked.clone()
    }

    /// Messages waiting in the backlog of `sub_name`.
    pub fn backlog_len(&self, sub_name: &SubscriptionName) -> usize {
        let ack_deadline = self.ack_deadline;
        self.lock()
            .subscriptions
            .get_mut(sub_name)
            .map_or(0, |sub| {
                sub.reclaim(ack_deadline);
                sub.backlog.len()
            })
    }

    /// Delivered but not yet acknowledged messages of `sub_name`.
    pub fn outstanding_len(&self, sub_name: &SubscriptionName) -> usize {
        let ack_deadline = self.ack_deadline;
        self.lock()
            .subscriptions
            .get_mut(sub_name)
            .map_or(0, |sub| {
                sub.reclaim(ack_deadline);
                sub.outstanding.len()
            })
    }

    pub fn topic_exists(&self, topic_name: &TopicName) -> bool {
        self.lock().topics.contains(topic_name)
    }

    pub fn subscription_exists(&self, sub_name: &SubscriptionName) -> bool {
        self.lock().subscriptions.contains_key(sub_name)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn subscription_not_found(sub_name: &SubscriptionName) -> BackendError {
    BackendError::NotFound(format!("Subscription {sub_name}"))
}

fn topic_not_found(topic_name: &TopicName) -> BackendError {
    BackendError::NotFound(format!("Topic {topic_name}"))
}

fn ack_rejected() -> BackendError {
    BackendError::Rpc {
        code: "Unavailable".to_string(),
        message: "acknowledge rejected".to_string(),
    }
}

#[async_trait]
impl PubSubProvider for MemoryProvider {
    async fn create_topic(&self, topic_name: &TopicName) -> Result<(), BackendError> {
        if self.lock().topics.insert(topic_name.clone()) {
            Ok(())
        } else {
            Err(BackendError::AlreadyExists(format!("Topic {topic_name}")))
        }
    }

    async fn delete_topic(&self, topic_name: &TopicName) -> Result<(), BackendError> {
        let mut state = self.lock();
        if !state.topics.remove(topic_name) {
            return Err(topic_not_found(topic_name));
        }

        for sub in state.subscriptions.values_mut() {
            if sub.topic.as_ref() == Some(topic_name) {
                sub.topic = None;
            }
        }
        Ok(())
    }

    async fn create_subscription(
        &self,
        sub_name: &SubscriptionName,
        topic_name: &TopicName,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        if !state.topics.contains(topic_name) {
            return Err(topic_not_found(topic_name));
        }
        if state.subscriptions.contains_key(sub_name) {
            return Err(BackendError::AlreadyExists(format!(
                "Subscription {sub_name}"
            )));
        }

        state.subscriptions.insert(
            sub_name.clone(),
            Subscription::new(sub_name.clone(), topic_name.clone()),
        );
        Ok(())
    }

    async fn delete_subscription(&self, sub_name: &SubscriptionName) -> Result<(), BackendError> {
        match self.lock().subscriptions.remove(sub_name) {
            Some(_) => Ok(()),
            None => Err(subscription_not_found(sub_name)),
        }
    }

    async fn publish(
        &self,
        topic_name: &TopicName,
        messages: Vec<PubsubMessageToPublish>,
    ) -> Vec<Result<MessageId, BackendError>> {
        let ack_deadline = self.ack_deadline;
        let mut state = self.lock();

        messages
            .into_iter()
            .map(|message| {
                self.publish_calls.fetch_add(1, Ordering::SeqCst);

                if !state.topics.contains(topic_name) {
                    return Err(topic_not_found(topic_name));
                }

                state.next_message_id += 1;
                let id = state.next_message_id.to_string();
                let publish_time = Some(Utc::now());

                for (sub_name, sub) in state.subscriptions.iter_mut() {
                    if sub.topic.as_ref() != Some(topic_name) {
                        continue;
                    }

                    sub.deliver(
                        PubsubMessage {
                            id: id.clone(),
                            publish_time,
                            data: message.data.clone(),
                            attributes: HashMap::new(),
                            subscription: sub_name.clone(),
                            ack_id: String::new(),
                        },
                        ack_deadline,
                    );
                }

                Ok(id)
            })
            .collect()
    }

    async fn pull(
        &self,
        sub_name: &SubscriptionName,
        max_messages: i32,
    ) -> Result<Vec<PubsubMessage>, BackendError> {
        let mut state = self.lock();
        let sub = state
            .subscriptions
            .get_mut(sub_name)
            .ok_or_else(|| subscription_not_found(sub_name))?;

        sub.reclaim(self.ack_deadline);
        Ok(sub.pull(usize::try_from(max_messages).unwrap_or(0), self.ack_deadline))
    }

    async fn acknowledge(
        &self,
        sub_name: &SubscriptionName,
        ack_ids: Vec<String>,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        let State {
            subscriptions,
            failing_acks,
            acked,
            ..
        } = &mut *state;

        let sub = subscriptions
            .get_mut(sub_name)
            .ok_or_else(|| subscription_not_found(sub_name))?;

        // A rejected ack behaves like a nack: the messages are redelivered right away.
        if self.fail_acks.load(Ordering::SeqCst) || failing_acks.contains(sub_name) {
            sub.requeue(&ack_ids);
            return Err(ack_rejected());
        }

        // Unknown or already acknowledged ack ids are ignored, like expired leases.
        for ack_id in ack_ids {
            if let Some(lease) = sub.outstanding.remove(&ack_id) {
                acked.push((sub_name.clone(), lease.message.id));
            }
        }
        Ok(())
    }

    async fn subscribe(&self, sub_name: &SubscriptionName) -> Result<MessageStream, BackendError> {
        let mut state = self.lock();
        state.next_stream_id += 1;
        let stream_id = state.next_stream_id;

        let sub = state
            .subscriptions
            .get_mut(sub_name)
            .ok_or_else(|| subscription_not_found(sub_name))?;

        sub.reclaim(self.ack_deadline);

        let (tx, rx) = mpsc::unbounded();
        sub.streams.push((stream_id, tx));

        let backlog: Vec<PubsubMessage> = sub.backlog.drain(..).collect();
        for message in backlog {
            sub.deliver(message, self.ack_deadline);
        }

        Ok(rx.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(data: &str) -> PubsubMessageToPublish {
        PubsubMessageToPublish::new(data.to_string())
    }

    #[tokio::test]
    async fn publish_fans_out_to_attached_subscriptions() {
        let provider = MemoryProvider::new();
        let topic = TopicName::from("orders");
        provider.create_topic(&topic).await.unwrap();
        provider
            .create_subscription(&"a".into(), &topic)
            .await
            .unwrap();
        provider
            .create_subscription(&"b".into(), &topic)
            .await
            .unwrap();

        let results = provider.publish(&topic, vec![message("one")]).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());

        assert_eq!(provider.backlog_len(&"a".into()), 1);
        assert_eq!(provider.backlog_len(&"b".into()), 1);
    }

    #[tokio::test]
    async fn publish_to_missing_topic_fails_per_message() {
        let provider = MemoryProvider::new();
        let results = provider
            .publish(&"nowhere".into(), vec![message("x"), message("y")])
            .await;

        assert_eq!(provider.publish_calls(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(BackendError::NotFound(_)))));
    }

    #[tokio::test]
    async fn pull_then_ack_clears_outstanding() {
        let provider = MemoryProvider::new();
        let topic = TopicName::from("t");
        let sub = SubscriptionName::from("s");
        provider.create_topic(&topic).await.unwrap();
        provider.create_subscription(&sub, &topic).await.unwrap();
        provider
            .publish(&topic, vec![message("1"), message("2"), message("3")])
            .await;

        let pulled = provider.pull(&sub, 2).await.unwrap();
        assert_eq!(pulled.len(), 2);
        assert_eq!(provider.backlog_len(&sub), 1);
        assert_eq!(provider.outstanding_len(&sub), 2);

        let ack_ids = pulled.into_iter().map(|m| m.ack_id).collect();
        provider.acknowledge(&sub, ack_ids).await.unwrap();
        assert_eq!(provider.outstanding_len(&sub), 0);
        assert_eq!(provider.acknowledged().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let provider = MemoryProvider::new();
        let topic = TopicName::from("t");
        provider.create_topic(&topic).await.unwrap();

        assert!(matches!(
            provider.create_topic(&topic).await,
            Err(BackendError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn deleted_topic_detaches_subscriptions() {
        let provider = MemoryProvider::new();
        let topic = TopicName::from("t");
        let sub = SubscriptionName::from("s");
        provider.create_topic(&topic).await.unwrap();
        provider.create_subscription(&sub, &topic).await.unwrap();

        provider.delete_topic(&topic).await.unwrap();
        provider.create_topic(&topic).await.unwrap();
        provider.publish(&topic, vec![message("late")]).await;

        assert!(provider.subscription_exists(&sub));
        assert_eq!(provider.backlog_len(&sub), 0);
    }

    #[tokio::test]
    async fn stream_receives_backlog_and_new_messages() {
        let provider = MemoryProvider::new();
        let topic = TopicName::from("t");
        let sub = SubscriptionName::from("s");
        provider.create_topic(&topic).await.unwrap();
        provider.create_subscription(&sub, &topic).await.unwrap();
        provider.publish(&topic, vec![message("before")]).await;

        let mut stream = provider.subscribe(&sub).await.unwrap();
        provider.publish(&topic, vec![message("after")]).await;

        assert_eq!(stream.next().await.unwrap().data, "before");
        assert_eq!(stream.next().await.unwrap().data, "after");
        assert_eq!(provider.outstanding_len(&sub), 2);

        provider.delete_subscription(&sub).await.unwrap();
        assert!(stream.next().await.is_none());
    }

    async fn topic_with_subscription() -> (MemoryProvider, TopicName, SubscriptionName) {
        let provider = MemoryProvider::with_ack_deadline(Duration::from_millis(100));
        let topic = TopicName::from("t");
        let sub = SubscriptionName::from("s");
        provider.create_topic(&topic).await.unwrap();
        provider.create_subscription(&sub, &topic).await.unwrap();
        (provider, topic, sub)
    }

    #[tokio::test]
    async fn rejected_ack_requeues_messages() {
        let (provider, topic, sub) = topic_with_subscription().await;
        provider
            .publish(&topic, vec![message("1"), message("2"), message("3")])
            .await;
        provider.fail_acks(true);

        let pulled = provider.pull(&sub, 10).await.unwrap();
        let ack_ids = pulled.into_iter().map(|m| m.ack_id).collect();
        assert!(provider.acknowledge(&sub, ack_ids).await.is_err());
        assert_eq!(provider.outstanding_len(&sub), 0);
        assert_eq!(provider.backlog_len(&sub), 3);

        provider.fail_acks(false);
        let again = provider.pull(&sub, 10).await.unwrap();
        let data: Vec<&str> = again.iter().map(|m| m.data.as_str()).collect();
        assert_eq!(data, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn dropped_stream_returns_its_deliveries() {
        let (provider, topic, sub) = topic_with_subscription().await;
        let stream = provider.subscribe(&sub).await.unwrap();
        provider
            .publish(&topic, vec![message("a"), message("b")])
            .await;
        assert_eq!(provider.outstanding_len(&sub), 2);

        drop(stream);

        let pulled = provider.pull(&sub, 10).await.unwrap();
        assert_eq!(pulled.len(), 2);
        assert_eq!(provider.backlog_len(&sub), 0);
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered_with_new_ack_id() {
        let (provider, topic, sub) = topic_with_subscription().await;
        provider.publish(&topic, vec![message("late")]).await;

        let first = provider.pull(&sub, 10).await.unwrap();
        assert!(provider.pull(&sub, 10).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = provider.pull(&sub, 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_ne!(second[0].ack_id, first[0].ack_id);

        // The stale delivery no longer acks anything.
        provider
            .acknowledge(&sub, vec![first[0].ack_id.clone()])
            .await
            .unwrap();
        assert!(provider.acknowledged().is_empty());
        assert_eq!(provider.outstanding_len(&sub), 1);
    }
}
