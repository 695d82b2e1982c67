use std::{future::Future, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use google_cloud_gax::{
    conn::Environment,
    grpc::{Code, Status},
};
use google_cloud_pubsub::{
    client::{Client, ClientConfig},
    subscription::SubscriptionConfig,
};

use crate::{
    error::BackendError,
    model::{MessageId, PubsubMessage, PubsubMessageToPublish, SubscriptionName, TopicName},
    provider::{MessageStream, PubSubProvider},
};

/// Google Cloud Pub/Sub, or the emulator when `PUBSUB_EMULATOR_HOST` is set.
pub struct GcpProvider {
    client: Client,
    /// How long a pull may wait for messages before it counts as empty.
    pull_wait: Duration,
}

impl GcpProvider {
    pub async fn connect(
        emulator_project_id: Option<String>,
        pull_wait: Duration,
    ) -> Result<Self, BackendError> {
        let mut config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| BackendError::Connect(e.to_string()))?;

        if let (Environment::Emulator(host), Some(emulator_project_id)) =
            (&config.environment, emulator_project_id)
        {
            log::info!(
                "Using Pub/Sub emulator at {} with project {}",
                host,
                emulator_project_id
            );
            config.project_id = Some(emulator_project_id);
        }

        let client = Client::new(config)
            .await
            .map_err(|e| BackendError::Connect(e.to_string()))?;

        Ok(Self { client, pull_wait })
    }
}

#[async_trait]
impl PubSubProvider for GcpProvider {
    async fn create_topic(&self, topic_name: &TopicName) -> Result<(), BackendError> {
        self.client.create_topic(&topic_name.0, None, None).await?;
        Ok(())
    }

    async fn delete_topic(&self, topic_name: &TopicName) -> Result<(), BackendError> {
        self.client.topic(&topic_name.0).delete(None).await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        sub_name: &SubscriptionName,
        topic_name: &TopicName,
    ) -> Result<(), BackendError> {
        self.client
            .create_subscription(
                &sub_name.0,
                &topic_name.0,
                SubscriptionConfig::default(),
                None,
            )
            .await?;
        Ok(())
    }

    async fn delete_subscription(&self, sub_name: &SubscriptionName) -> Result<(), BackendError> {
        self.client.subscription(&sub_name.0).delete(None).await?;
        Ok(())
    }

    async fn publish(
        &self,
        topic_name: &TopicName,
        messages: Vec<PubsubMessageToPublish>,
    ) -> Vec<Result<MessageId, BackendError>> {
        let topic = self.client.topic(&topic_name.0);
        let mut publisher = topic.new_publisher(None);

        let mut awaiters = Vec::with_capacity(messages.len());
        for message in messages {
            awaiters.push(publisher.publish(message.into()).await);
        }

        let results =
            futures::future::join_all(awaiters.into_iter().map(|awaiter| awaiter.get())).await;

        publisher.shutdown().await;

        results
            .into_iter()
            .map(|result| result.map_err(BackendError::from))
            .collect()
    }

    async fn pull(
        &self,
        sub_name: &SubscriptionName,
        max_messages: i32,
    ) -> Result<Vec<PubsubMessage>, BackendError> {
        let subscription = self.client.subscription(&sub_name.0);
        let messages =
            bounded_pull(subscription.pull(max_messages, None), self.pull_wait).await?;

        Ok(messages
            .into_iter()
            .map(|message| PubsubMessage::from_received(sub_name, message))
            .collect())
    }

    async fn acknowledge(
        &self,
        sub_name: &SubscriptionName,
        ack_ids: Vec<String>,
    ) -> Result<(), BackendError> {
        self.client.subscription(&sub_name.0).ack(ack_ids).await?;
        Ok(())
    }

    async fn subscribe(&self, sub_name: &SubscriptionName) -> Result<MessageStream, BackendError> {
        let subscription = self.client.subscription(&sub_name.0);
        let stream = subscription.subscribe(None).await?;

        let sub_name = sub_name.clone();
        Ok(stream
            .map(move |message| PubsubMessage::from_received(&sub_name, message))
            .boxed())
    }
}

/// The client library always sends pulls with `return_immediately` unset, so the server
/// holds an empty pull open. Cut it short and report an empty batch instead.
async fn bounded_pull<T>(
    pull: impl Future<Output = Result<Vec<T>, Status>>,
    pull_wait: Duration,
) -> Result<Vec<T>, BackendError> {
    match tokio::time::timeout(pull_wait, pull).await {
        Err(_elapsed) => Ok(Vec::new()),
        Ok(Err(status)) if status.code() == Code::DeadlineExceeded => Ok(Vec::new()),
        Ok(result) => result.map_err(BackendError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn pull_that_never_answers_is_empty() {
        let messages: Vec<u32> = bounded_pull(std::future::pending(), WAIT).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn deadline_exceeded_is_empty() {
        let pull = async { Err(Status::new(Code::DeadlineExceeded, "deadline")) };
        let messages: Vec<u32> = bounded_pull(pull, WAIT).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn answered_pull_passes_through() {
        let messages = bounded_pull(async { Ok(vec![1, 2]) }, WAIT).await.unwrap();
        assert_eq!(messages, vec![1, 2]);

        let pull = async { Err::<Vec<u32>, _>(Status::new(Code::NotFound, "Resource not found")) };
        assert_eq!(
            bounded_pull(pull, WAIT).await,
            Err(BackendError::NotFound("Resource not found".to_string()))
        );
    }
}
