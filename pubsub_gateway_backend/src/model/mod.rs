mod pubsub_message;
mod pubsub_message_to_publish;
pub use pubsub_message::PubsubMessage;
pub use pubsub_message_to_publish::PubsubMessageToPublish;

use std::fmt;

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct TopicName(pub String);

#[derive(
    Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct SubscriptionName(pub String);

/// Provider-assigned identifier of a published message.
pub type MessageId = String;

impl From<&str> for TopicName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<&str> for SubscriptionName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SubscriptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
