use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fio_common::enrichment::EnrichmentProvider;
use fio_common::person::NameRecord;
use fio_common::publisher::{ResponsePublisher, Status, StatusMessage};
use fio_common::store::RecordStore;

use crate::error::SessionError;

/// Only messages with this key carry name records, everything else on the topic is ignored.
pub const DATA_KEY: &str = "Data";

const MESSAGES_RECEIVED: &str = "fio_messages_received_total";
const MESSAGES_PROCESSED: &str = "fio_messages_processed_total";

/// A message read from one partition, detached from the Kafka client buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Empty when the message has no key.
    pub key: String,
    pub value: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// The acknowledgment side of a consumer group session.
pub trait Session: Send + Sync {
    /// Mark the message as consumed. The mark is committed in the background, and a
    /// marked message is not redelivered to the group.
    fn mark_message(&self, message: &InboundMessage) -> Result<(), SessionError>;
}

/// What happened to a single inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Not keyed as data.
    Skipped,
    /// Could not be decoded, or lacked a name or surname. A status message was attempted.
    Rejected,
    EnrichmentFailed,
    StorageFailed,
    Stored(i32),
}

impl MessageOutcome {
    fn label(&self) -> &'static str {
        match self {
            MessageOutcome::Skipped => "skipped",
            MessageOutcome::Rejected => "rejected",
            MessageOutcome::EnrichmentFailed => "enrichment_failed",
            MessageOutcome::StorageFailed => "storage_failed",
            MessageOutcome::Stored(_) => "stored",
        }
    }
}

/// Processes the messages claimed from a partition: decode, enrich, store.
///
/// A worker is cheap to clone, all clones share the same enrichment provider, store and
/// publisher. The coordinator hands one clone to each partition claim.
#[derive(Clone)]
pub struct ConsumerGroupWorker {
    enrichment: Arc<dyn EnrichmentProvider>,
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn ResponsePublisher>,
}

impl ConsumerGroupWorker {
    pub fn new(
        enrichment: Arc<dyn EnrichmentProvider>,
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn ResponsePublisher>,
    ) -> Self {
        Self {
            enrichment,
            store,
            publisher,
        }
    }

    /// Consume a partition claim until it is closed or `shutdown` is cancelled.
    ///
    /// Every message is marked on the session before it is processed, so a message
    /// whose processing fails is never redelivered. A message that cannot be marked is
    /// dropped unprocessed, as it will be delivered to the new owner of its partition.
    /// Cancellation is only observed between messages: the message in flight always
    /// completes, the messages still queued are dropped.
    pub async fn consume_claim<S: Session + ?Sized>(
        &self,
        session: &S,
        mut claim: mpsc::Receiver<InboundMessage>,
        shutdown: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("claim consumption cancelled");
                    break;
                }
                message = claim.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            metrics::counter!(MESSAGES_RECEIVED).increment(1);
            if let Err(error) = session.mark_message(&message) {
                warn!(
                    partition = message.partition,
                    offset = message.offset,
                    "dropping message that could not be marked: {}",
                    error
                );
                metrics::counter!(MESSAGES_PROCESSED, "outcome" => "mark_failed").increment(1);
                continue;
            }

            let outcome = self.process_message(&message).await;
            metrics::counter!(MESSAGES_PROCESSED, "outcome" => outcome.label()).increment(1);
        }
    }

    /// Run a single message through the pipeline. Failures are logged and turned into an
    /// outcome, they never stop the caller.
    pub async fn process_message(&self, message: &InboundMessage) -> MessageOutcome {
        if message.key != DATA_KEY {
            debug!(
                partition = message.partition,
                offset = message.offset,
                key = %message.key,
                "skipping message not keyed as data"
            );
            return MessageOutcome::Skipped;
        }

        let record = match NameRecord::from_slice(&message.value) {
            Ok(record) => record,
            Err(error) => {
                warn!(
                    partition = message.partition,
                    offset = message.offset,
                    "rejecting name record: {}",
                    error
                );
                self.publish_status(Status::FioFailed).await;
                return MessageOutcome::Rejected;
            }
        };

        let enriched = match self.enrichment.enrich(record).await {
            Ok(enriched) => enriched,
            Err(error) => {
                error!(
                    partition = message.partition,
                    offset = message.offset,
                    "failed to enrich name record: {}",
                    error
                );
                return MessageOutcome::EnrichmentFailed;
            }
        };

        match self.store.save(&enriched).await {
            Ok(id) => {
                info!(
                    partition = message.partition,
                    offset = message.offset,
                    id,
                    "stored enriched record"
                );
                MessageOutcome::Stored(id)
            }
            Err(error) => {
                error!(
                    partition = message.partition,
                    offset = message.offset,
                    "failed to store enriched record: {}",
                    error
                );
                MessageOutcome::StorageFailed
            }
        }
    }

    /// Attempted once, a failure is only logged.
    async fn publish_status(&self, status: Status) {
        if let Err(error) = self.publisher.publish(StatusMessage::new(status)).await {
            error!("failed to publish {} status: {}", status, error);
            metrics::counter!(MESSAGES_PROCESSED, "outcome" => "status_publish_failed")
                .increment(1);
        }
    }
}
