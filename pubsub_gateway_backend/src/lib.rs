use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use error::BackendError;
use model::{MessageId, PubsubMessage, PubsubMessageToPublish, SubscriptionName, TopicName};
use outcome::{PullOutcome, SubscribeOutcome, UnsubscribeOutcome};
use provider::PubSubProvider;
use registry::SubscriberRegistry;

pub mod error;
pub mod gcp;
pub mod memory;
pub mod model;
pub mod outcome;
pub mod provider;
pub mod registry;

/// How many messages a single pull asks the provider for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullSettings {
    pub pull_max_messages: i32,
    /// Applies to each of the two subscriptions of a multipull.
    pub multipull_max_messages: i32,
}

impl Default for PullSettings {
    fn default() -> Self {
        Self {
            pull_max_messages: 10,
            multipull_max_messages: 1000,
        }
    }
}

pub struct Backend {
    provider: Arc<dyn PubSubProvider>,
    subscribers: SubscriberRegistry,
    settings: PullSettings,
}

impl Backend {
    pub fn new(provider: Arc<dyn PubSubProvider>, settings: PullSettings) -> Self {
        Self {
            provider,
            subscribers: SubscriberRegistry::new(),
            settings,
        }
    }

    pub async fn create_topic(&self, topic_name: &TopicName) -> Result<(), BackendError> {
        self.provider.create_topic(topic_name).await
    }

    pub async fn create_subscription(
        &self,
        topic_name: &TopicName,
        sub_name: &SubscriptionName,
    ) -> Result<(), BackendError> {
        self.provider.create_subscription(sub_name, topic_name).await
    }

    pub async fn delete_topic(&self, topic_name: &TopicName) -> Result<(), BackendError> {
        self.provider.delete_topic(topic_name).await
    }

    /// Deletes the subscription and stops any local subscriber attached to it.
    pub async fn delete_subscription(&self, sub_name: &SubscriptionName) -> Result<(), BackendError> {
        self.provider.delete_subscription(sub_name).await?;
        self.subscribers.unsubscribe(sub_name).await;
        Ok(())
    }

    /// Publishes `count` copies of `message` and returns every outcome in submission order.
    pub async fn publish_batch(
        &self,
        topic_name: &TopicName,
        message: &str,
        count: u32,
    ) -> Vec<Result<MessageId, BackendError>> {
        let messages = (0..count)
            .map(|_| PubsubMessageToPublish::new(message.to_owned()))
            .collect();

        self.provider.publish(topic_name, messages).await
    }

    pub async fn pull(&self, sub_name: &SubscriptionName) -> Result<PullOutcome, BackendError> {
        let messages = self
            .provider
            .pull(sub_name, self.settings.pull_max_messages)
            .await?;

        // Every delivery is acked, even when a batch repeats a message id.
        Ok(self.acknowledge(messages).await)
    }

    pub async fn multipull(
        &self,
        first: &SubscriptionName,
        second: &SubscriptionName,
    ) -> Result<PullOutcome, BackendError> {
        let max_messages = self.settings.multipull_max_messages;
        let (first_batch, second_batch) = futures::try_join!(
            self.provider.pull(first, max_messages),
            self.provider.pull(second, max_messages),
        )?;

        Ok(self
            .acknowledge(merge_batches(vec![first_batch, second_batch]))
            .await)
    }

    pub async fn subscribe(&self, sub_name: &SubscriptionName) -> Result<SubscribeOutcome, BackendError> {
        self.subscribers
            .subscribe(self.provider.clone(), sub_name)
            .await
    }

    pub async fn unsubscribe(&self, sub_name: &SubscriptionName) -> UnsubscribeOutcome {
        self.subscribers.unsubscribe(sub_name).await
    }

    /// Subscriptions with an active local subscriber.
    pub fn subscriptions(&self) -> Vec<SubscriptionName> {
        self.subscribers.names()
    }

    pub async fn shutdown(&self) {
        self.subscribers.shutdown().await;
    }

    /// Acknowledges the whole batch. Acks are scoped per subscription, so one request
    /// is sent per subscription and the batch only counts as acked if all of them succeed.
    async fn acknowledge(&self, messages: Vec<PubsubMessage>) -> PullOutcome {
        if messages.is_empty() {
            return PullOutcome::Empty;
        }

        let results = futures::future::join_all(
            ack_ids_by_subscription(&messages)
                .into_iter()
                .map(|(sub_name, ack_ids)| self.provider.acknowledge(sub_name, ack_ids)),
        )
        .await;

        if let Some(err) = results.into_iter().find_map(Result::err) {
            log::warn!("Acking failed. {}", err);
            return PullOutcome::AckFailed;
        }

        for message in &messages {
            log::info!("MessageId: {}, data: {}", message.id, message.data);
        }

        PullOutcome::Acked(messages.len())
    }
}

fn ack_ids_by_subscription(
    messages: &[PubsubMessage],
) -> BTreeMap<&SubscriptionName, Vec<String>> {
    let mut ack_ids: BTreeMap<&SubscriptionName, Vec<String>> = BTreeMap::new();
    for message in messages {
        ack_ids
            .entry(&message.subscription)
            .or_default()
            .push(message.ack_id.clone());
    }
    ack_ids
}

/// Concatenates batches, keeping only the first delivery of each message id.
fn merge_batches(batches: Vec<Vec<PubsubMessage>>) -> Vec<PubsubMessage> {
    let mut seen = HashSet::new();

    batches
        .into_iter()
        .flatten()
        .filter(|message| seen.insert(message.id.clone()))
        .collect()
}
