use chrono::{DateTime, Utc};
use std::fmt;

/// A message received on a subscribed topic, stamped on arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn now(topic: String, payload: String) -> Self {
        InboundMessage {
            topic,
            payload,
            received_at: Utc::now(),
        }
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.topic, self.payload)
    }
}
