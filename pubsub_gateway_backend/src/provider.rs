//! The seam between the gateway and the managed pub/sub service.
//!
//! [`crate::gcp::GcpProvider`] talks to Google Cloud Pub/Sub (or its emulator),
//! [`crate::memory::MemoryProvider`] keeps everything in process.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    error::BackendError,
    model::{MessageId, PubsubMessage, PubsubMessageToPublish, SubscriptionName, TopicName},
};

/// Stream of deliveries from a streaming pull. Ends when the provider closes it.
pub type MessageStream = BoxStream<'static, PubsubMessage>;

#[async_trait]
pub trait PubSubProvider: Send + Sync {
    async fn create_topic(&self, topic_name: &TopicName) -> Result<(), BackendError>;

    async fn delete_topic(&self, topic_name: &TopicName) -> Result<(), BackendError>;

    async fn create_subscription(
        &self,
        sub_name: &SubscriptionName,
        topic_name: &TopicName,
    ) -> Result<(), BackendError>;

    async fn delete_subscription(&self, sub_name: &SubscriptionName) -> Result<(), BackendError>;

    /// Publishes every message on `topic_name` and resolves each outcome, in order.
    async fn publish(
        &self,
        topic_name: &TopicName,
        messages: Vec<PubsubMessageToPublish>,
    ) -> Vec<Result<MessageId, BackendError>>;

    /// Pulls at most `max_messages` without waiting for new messages to arrive.
    async fn pull(
        &self,
        sub_name: &SubscriptionName,
        max_messages: i32,
    ) -> Result<Vec<PubsubMessage>, BackendError>;

    async fn acknowledge(
        &self,
        sub_name: &SubscriptionName,
        ack_ids: Vec<String>,
    ) -> Result<(), BackendError>;

    /// Opens a streaming pull. Delivered messages still have to be acknowledged.
    async fn subscribe(&self, sub_name: &SubscriptionName) -> Result<MessageStream, BackendError>;
}
