use std::fmt;

use async_trait::async_trait;
use rdkafka::producer::FutureProducer;

use crate::kafka_producer::{send_keyed, KafkaContext, KafkaProduceError};

/// Key shared by every status message, so consumers of the channel can tell them from data.
pub const STATUS_KEY: &str = "Status";

/// Fixed vocabulary of status codes sent back on the outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The inbound payload could not be decoded or lacked a name or surname.
    FioFailed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::FioFailed => "FIO_FAILED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub value: Status,
}

impl StatusMessage {
    pub fn new(value: Status) -> Self {
        Self { value }
    }

    pub fn key(&self) -> &'static str {
        STATUS_KEY
    }
}

/// Emits status messages back onto the outbound channel. Publishing is attempted once,
/// callers do not retry.
#[async_trait]
pub trait ResponsePublisher: Send + Sync {
    async fn publish(&self, message: StatusMessage) -> Result<(), KafkaProduceError>;
}

pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: &str) -> Self {
        Self {
            producer,
            topic: topic.to_owned(),
        }
    }
}

#[async_trait]
impl ResponsePublisher for KafkaPublisher {
    async fn publish(&self, message: StatusMessage) -> Result<(), KafkaProduceError> {
        send_keyed(
            &self.producer,
            &self.topic,
            message.key(),
            message.value.as_str().as_bytes(),
        )
        .await?;

        Ok(())
    }
}
