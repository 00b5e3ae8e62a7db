use rdkafka::error::KafkaError;
use thiserror::Error;

/// Failures that stop the consumer group coordinator. All of them are fatal to the process.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("failed to create kafka consumer: {0}")]
    ConsumerCreationError(KafkaError),
    #[error("kafka brokers are unreachable: {0}")]
    BrokersUnreachable(KafkaError),
    #[error("failed to subscribe to topic {topic}: {error}")]
    SubscriptionError { topic: String, error: KafkaError },
    #[error("kafka consumer failed: {0}")]
    ConsumerFailed(KafkaError),
}

/// A message could not be marked on its session, usually because its partition was
/// revoked in the meantime. Such a message belongs to another group member now.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to store offset: {0}")]
    OffsetStoreError(KafkaError),
}
