//! Push subscriptions that are active in this process.
//!
//! Each registered subscription owns one background task that drains a streaming pull,
//! logs every delivery and acknowledges it. There is at most one task per subscription
//! name.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::StreamExt;
use tokio::{select, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    error::BackendError,
    model::{PubsubMessage, SubscriptionName},
    outcome::{SubscribeOutcome, UnsubscribeOutcome},
    provider::{MessageStream, PubSubProvider},
};

type Subscribers = Arc<Mutex<HashMap<SubscriptionName, Subscriber>>>;

struct Subscriber {
    /// Distinguishes this registration from a later one under the same name.
    id: Uuid,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Subscribers,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, sub_name: &SubscriptionName) -> bool {
        lock(&self.subscribers).contains_key(sub_name)
    }

    pub fn len(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the active subscriptions, sorted.
    pub fn names(&self) -> Vec<SubscriptionName> {
        let mut names: Vec<SubscriptionName> = lock(&self.subscribers).keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn subscribe(
        &self,
        provider: Arc<dyn PubSubProvider>,
        sub_name: &SubscriptionName,
    ) -> Result<SubscribeOutcome, BackendError> {
        if self.contains(sub_name) {
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        let stream = provider.subscribe(sub_name).await?;

        let mut subscribers = lock(&self.subscribers);
        // Lost a race with a concurrent subscribe; the fresh stream is dropped.
        if subscribers.contains_key(sub_name) {
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        let id = Uuid::new_v4();
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(receive_messages(
            provider,
            sub_name.clone(),
            stream,
            cancel_token.clone(),
            Registration {
                id,
                subscribers: self.subscribers.clone(),
            },
        ));

        subscribers.insert(
            sub_name.clone(),
            Subscriber {
                id,
                cancel_token,
                task,
            },
        );

        log::info!("Subscribed to {} subscription", sub_name);
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Stops the subscriber for `sub_name` and waits for its task to finish.
    pub async fn unsubscribe(&self, sub_name: &SubscriptionName) -> UnsubscribeOutcome {
        let removed = lock(&self.subscribers).remove(sub_name);

        match removed {
            Some(subscriber) => {
                subscriber.cancel_token.cancel();
                let _ = subscriber.task.await;
                log::info!("Unsubscribed from {} subscription", sub_name);
                UnsubscribeOutcome::Unsubscribed
            }
            None => UnsubscribeOutcome::NotSubscribed,
        }
    }

    /// Stops every subscriber.
    pub async fn shutdown(&self) {
        let drained: Vec<(SubscriptionName, Subscriber)> =
            lock(&self.subscribers).drain().collect();

        if drained.is_empty() {
            return;
        }

        log::info!("Stopping {} subscriber(s)", drained.len());

        let tasks = drained.into_iter().map(|(_, subscriber)| {
            subscriber.cancel_token.cancel();
            subscriber.task
        });
        futures::future::join_all(tasks).await;
    }
}

/// Lets a finished task remove its own entry, and only its own.
struct Registration {
    id: Uuid,
    subscribers: Subscribers,
}

impl Registration {
    fn release(self, sub_name: &SubscriptionName) {
        let mut subscribers = lock(&self.subscribers);
        if subscribers
            .get(sub_name)
            .is_some_and(|subscriber| subscriber.id == self.id)
        {
            subscribers.remove(sub_name);
        }
    }
}

async fn receive_messages(
    provider: Arc<dyn PubSubProvider>,
    sub_name: SubscriptionName,
    mut stream: MessageStream,
    cancel_token: CancellationToken,
    registration: Registration,
) {
    loop {
        select! {
            _ = cancel_token.cancelled() => break,
            next = stream.next() => match next {
                Some(message) => on_message(provider.as_ref(), &sub_name, message).await,
                None => {
                    log::warn!("Message stream for {} subscription closed", sub_name);
                    break;
                }
            }
        }
    }

    registration.release(&sub_name);
}

async fn on_message(provider: &dyn PubSubProvider, sub_name: &SubscriptionName, message: PubsubMessage) {
    log::info!(
        "Message received from {} subscription: {}",
        sub_name,
        message.data
    );

    if let Err(err) = provider.acknowledge(sub_name, vec![message.ack_id]).await {
        log::warn!(
            "Acking message {} from {} subscription failed: {}",
            message.id,
            sub_name,
            err
        );
    }
}

fn lock(
    subscribers: &Mutex<HashMap<SubscriptionName, Subscriber>>,
) -> MutexGuard<'_, HashMap<SubscriptionName, Subscriber>> {
    subscribers.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        memory::MemoryProvider,
        model::{PubsubMessageToPublish, TopicName},
    };

    async fn provider_with_subscription(topic: &str, sub: &str) -> Arc<MemoryProvider> {
        let provider = Arc::new(MemoryProvider::new());
        provider.create_topic(&topic.into()).await.unwrap();
        provider
            .create_subscription(&sub.into(), &topic.into())
            .await
            .unwrap();
        provider
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let provider = provider_with_subscription("t", "s").await;
        let registry = SubscriberRegistry::new();
        let sub = SubscriptionName::from("s");

        let first = registry.subscribe(provider.clone(), &sub).await.unwrap();
        let second = registry.subscribe(provider.clone(), &sub).await.unwrap();

        assert_eq!(first, SubscribeOutcome::Subscribed);
        assert_eq!(second, SubscribeOutcome::AlreadySubscribed);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_to_missing_subscription_fails() {
        let provider = Arc::new(MemoryProvider::new());
        let registry = SubscriberRegistry::new();

        let result = registry.subscribe(provider, &"missing".into()).await;

        assert!(matches!(result, Err(BackendError::NotFound(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn deliveries_are_acknowledged() {
        let provider = provider_with_subscription("t", "s").await;
        let registry = SubscriberRegistry::new();
        let topic = TopicName::from("t");

        registry
            .subscribe(provider.clone(), &"s".into())
            .await
            .unwrap();
        provider
            .publish(
                &topic,
                vec![
                    PubsubMessageToPublish::new("a".to_string()),
                    PubsubMessageToPublish::new("b".to_string()),
                ],
            )
            .await;

        wait_until(|| provider.acknowledged().len() == 2).await;
        assert_eq!(provider.outstanding_len(&"s".into()), 0);
    }

    #[tokio::test]
    async fn unsubscribe_then_subscribe_again() {
        let provider = provider_with_subscription("t", "s").await;
        let registry = SubscriberRegistry::new();
        let sub = SubscriptionName::from("s");

        registry.subscribe(provider.clone(), &sub).await.unwrap();
        assert_eq!(
            registry.unsubscribe(&sub).await,
            UnsubscribeOutcome::Unsubscribed
        );
        assert_eq!(
            registry.unsubscribe(&sub).await,
            UnsubscribeOutcome::NotSubscribed
        );
        assert!(registry.is_empty());

        let outcome = registry.subscribe(provider, &sub).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Subscribed);
    }

    #[tokio::test]
    async fn closed_stream_releases_registration() {
        let provider = provider_with_subscription("t", "s").await;
        let registry = SubscriberRegistry::new();
        let sub = SubscriptionName::from("s");

        registry.subscribe(provider.clone(), &sub).await.unwrap();
        provider.delete_subscription(&sub).await.unwrap();

        wait_until(|| registry.is_empty()).await;
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let provider = provider_with_subscription("t", "a").await;
        provider
            .create_subscription(&"b".into(), &"t".into())
            .await
            .unwrap();
        let registry = SubscriberRegistry::new();

        registry.subscribe(provider.clone(), &"a".into()).await.unwrap();
        registry.subscribe(provider.clone(), &"b".into()).await.unwrap();
        assert_eq!(
            registry.names(),
            vec![SubscriptionName::from("a"), SubscriptionName::from("b")]
        );

        registry.shutdown().await;
        assert!(registry.is_empty());
    }
}
