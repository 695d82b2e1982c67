use chrono::{DateTime, TimeZone, Utc};
use google_cloud_pubsub::subscriber::ReceivedMessage;
use std::collections::HashMap;

use super::{MessageId, SubscriptionName};

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct PubsubMessage {
    pub id: MessageId,
    pub publish_time: Option<DateTime<Utc>>,
    pub data: String,
    pub attributes: HashMap<String, String>,
    /// The subscription this delivery came from. Acks are scoped to it.
    #[serde(skip)]
    pub subscription: SubscriptionName,
    #[serde(skip)]
    pub ack_id: String,
}

impl PubsubMessage {
    pub fn from_received(sub_name: &SubscriptionName, value: ReceivedMessage) -> Self {
        let ack_id = value.ack_id().to_owned();

        let publish_time = value
            .message
            .publish_time
            .and_then(|t| timestamp_to_utc(t.seconds, t.nanos));

        let data = String::from_utf8_lossy(&value.message.data).into_owned();

        Self {
            id: value.message.message_id,
            publish_time,
            data,
            attributes: value.message.attributes,
            subscription: sub_name.clone(),
            ack_id,
        }
    }
}

fn timestamp_to_utc(seconds: i64, nanos: i32) -> Option<DateTime<Utc>> {
    match Utc.timestamp_opt(seconds, nanos.try_into().unwrap_or(0)) {
        chrono::LocalResult::Single(dt) => Some(dt),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_skips_delivery_details() {
        let message = PubsubMessage {
            id: "42".to_string(),
            publish_time: None,
            data: "hello".to_string(),
            attributes: HashMap::new(),
            subscription: SubscriptionName::from("sub"),
            ack_id: "ack-42".to_string(),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["id"], "42");
        assert_eq!(json["data"], "hello");
        assert!(json.get("ack_id").is_none());
        assert!(json.get("subscription").is_none());
    }

    #[test]
    fn timestamp_conversion() {
        let dt = timestamp_to_utc(1_700_000_000, 5).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_nanos(), 5);
        assert!(timestamp_to_utc(i64::MAX, 0).is_none());
    }
}
