use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::{ClientConfig, ClientContext, Message, TopicPartitionList};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fio_common::config::KafkaConfig;
use fio_common::health::HealthHandle;

use crate::config::ConsumerConfig;
use crate::error::{CoordinatorError, SessionError};
use crate::worker::{ConsumerGroupWorker, InboundMessage, Session};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const LIVENESS_INTERVAL: Duration = Duration::from_secs(10);
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(500);

const KAFKA_RECV_ERRORS: &str = "fio_kafka_consumer_errors_total";

#[derive(Debug)]
enum SessionEvent {
    Revoked(Vec<i32>),
    Fatal(KafkaError),
}

/// Errors after which the consumer cannot make progress without operator action.
fn is_fatal(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::Fatal | RDKafkaErrorCode::AllBrokersDown)
    )
}

fn partitions(list: &TopicPartitionList) -> Vec<i32> {
    list.elements().iter().map(|elem| elem.partition()).collect()
}

/// Consumer context logging session setup and cleanup, and forwarding revocations and
/// fatal client errors to the coordinator loop.
pub struct CoordinatorContext {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ClientContext for CoordinatorContext {
    fn error(&self, error: KafkaError, reason: &str) {
        error!("librdkafka: {}: {}", error, reason);
        if is_fatal(&error) {
            if let Err(e) = self.events.send(SessionEvent::Fatal(error)) {
                error!("failed to forward fatal consumer error: {}", e);
            }
        }
    }
}

impl ConsumerContext for CoordinatorContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(list) => {
                let revoked = partitions(list);
                info!("session cleanup, revoking partitions {:?}", revoked);
                if revoked.is_empty() {
                    return;
                }
                if let Err(e) = self.events.send(SessionEvent::Revoked(revoked)) {
                    error!("failed to forward revoked partitions: {}", e);
                }
            }
            Rebalance::Assign(list) => {
                debug!("pre-rebalance assign event for {} partitions", list.count());
            }
            Rebalance::Error(e) => {
                error!("rebalance error: {}", e);
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(list) => {
                info!("session setup, assigned partitions {:?}", partitions(list));
            }
            Rebalance::Revoke(_) => {
                debug!("post-rebalance revoke event");
            }
            Rebalance::Error(e) => {
                error!("post-rebalance error: {}", e);
            }
        }
    }
}

type GroupConsumer = StreamConsumer<CoordinatorContext>;

/// Marks messages by storing their offset, auto commit flushes stored offsets in the background.
struct KafkaSession {
    consumer: Arc<GroupConsumer>,
    topic: String,
}

impl Session for KafkaSession {
    // Fails once the partition is no longer assigned to this consumer
    fn mark_message(&self, message: &InboundMessage) -> Result<(), SessionError> {
        self.consumer
            .store_offset(&self.topic, message.partition, message.offset + 1)
            .map_err(SessionError::OffsetStoreError)
    }
}

fn inbound_from_kafka<M: Message>(message: &M) -> InboundMessage {
    InboundMessage {
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default(),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        partition: message.partition(),
        offset: message.offset(),
    }
}

/// A partition claim: messages are queued to a dedicated worker task, so partitions are
/// processed concurrently and each partition in offset order.
struct Claim {
    sender: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Claim {
    fn open(
        partition: i32,
        worker: &ConsumerGroupWorker,
        session: Arc<dyn Session>,
        buffer_size: usize,
        shutdown: &CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let cancel = shutdown.child_token();
        let worker = worker.clone();

        let claim_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            info!(partition, "claim opened");
            worker
                .consume_claim(session.as_ref(), receiver, claim_cancel)
                .await;
            info!(partition, "claim closed");
        });

        Self {
            sender,
            cancel,
            handle,
        }
    }

    /// Wait for the message in flight to complete. Queued messages are dropped unmarked,
    /// so they are delivered again to whoever owns the partition next.
    async fn close(self, partition: i32) {
        self.cancel.cancel();
        drop(self.sender);
        if let Err(e) = self.handle.await {
            error!(partition, "claim worker failed: {}", e);
        }
    }
}

/// Joins the consumer group and fans claimed messages out to one worker per partition.
pub struct GroupCoordinator {
    consumer: Arc<GroupConsumer>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    topic: String,
    claim_buffer_size: usize,
    worker: ConsumerGroupWorker,
    liveness: HealthHandle,
}

impl GroupCoordinator {
    /// Create the group consumer and subscribe it to the inbound topic. Failing to reach
    /// the brokers or to subscribe is fatal.
    pub fn new(
        kafka: &KafkaConfig,
        config: &ConsumerConfig,
        worker: ConsumerGroupWorker,
        liveness: HealthHandle,
    ) -> Result<Self, CoordinatorError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &kafka.kafka_hosts)
            .set("group.id", &config.kafka_consumer_group)
            .set(
                "partition.assignment.strategy",
                config.kafka_assignment_strategy.rdkafka_name(),
            )
            .set("auto.offset.reset", &config.kafka_consumer_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false");

        if kafka.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let (events_tx, events) = mpsc::unbounded_channel();
        let consumer: GroupConsumer = client_config
            .create_with_context(CoordinatorContext { events: events_tx })
            .map_err(CoordinatorError::ConsumerCreationError)?;

        // "Ping" the Kafka brokers by requesting metadata
        let metadata = consumer
            .fetch_metadata(Some(config.kafka_consumer_topic.as_str()), METADATA_TIMEOUT)
            .map_err(CoordinatorError::BrokersUnreachable)?;
        info!(
            "connected to Kafka brokers, found {} partitions for topic {}",
            metadata
                .topics()
                .iter()
                .map(|topic| topic.partitions().len())
                .sum::<usize>(),
            config.kafka_consumer_topic
        );

        consumer
            .subscribe(&[config.kafka_consumer_topic.as_str()])
            .map_err(|error| CoordinatorError::SubscriptionError {
                topic: config.kafka_consumer_topic.clone(),
                error,
            })?;

        Ok(Self {
            consumer: Arc::new(consumer),
            events,
            topic: config.kafka_consumer_topic.clone(),
            claim_buffer_size: config.claim_buffer_size,
            worker,
            liveness,
        })
    }

    /// Consume until `shutdown` is cancelled or the consumer hits a fatal error. Claims are
    /// opened lazily when the first message of a partition arrives, and closed when the
    /// partition is revoked. On return no new messages are claimed, and the messages being
    /// processed have completed.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), CoordinatorError> {
        let GroupCoordinator {
            consumer,
            mut events,
            topic,
            claim_buffer_size,
            worker,
            liveness,
        } = self;

        let session: Arc<dyn Session> = Arc::new(KafkaSession {
            consumer: consumer.clone(),
            topic: topic.clone(),
        });
        let mut claims: HashMap<i32, Claim> = HashMap::new();
        let mut heartbeat = tokio::time::interval(LIVENESS_INTERVAL);

        info!("consuming from topic {}", topic);
        let result = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutting down consumer group coordinator");
                    break Ok(());
                }
                Some(event) = events.recv() => match event {
                    SessionEvent::Revoked(revoked) => {
                        for partition in revoked {
                            if let Some(claim) = claims.remove(&partition) {
                                claim.close(partition).await;
                            }
                        }
                    }
                    SessionEvent::Fatal(e) => {
                        break Err(CoordinatorError::ConsumerFailed(e));
                    }
                },
                _ = heartbeat.tick() => liveness.report_healthy().await,
                received = consumer.recv() => {
                    let message = match received {
                        Ok(message) => inbound_from_kafka(&message),
                        Err(e) if is_fatal(&e) => {
                            break Err(CoordinatorError::ConsumerFailed(e));
                        }
                        Err(e) => {
                            error!("failed to receive message: {}", e);
                            metrics::counter!(KAFKA_RECV_ERRORS).increment(1);
                            tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                            continue;
                        }
                    };

                    let partition = message.partition;
                    let claim = claims.entry(partition).or_insert_with(|| {
                        Claim::open(
                            partition,
                            &worker,
                            session.clone(),
                            claim_buffer_size,
                            &shutdown,
                        )
                    });
                    if claim.sender.send(message).await.is_err() {
                        warn!(partition, "claim closed before message could be queued");
                    }
                }
            }
        };

        for (partition, claim) in claims.drain() {
            claim.close(partition).await;
        }
        match &result {
            Ok(()) => info!("consumer group coordinator stopped"),
            Err(e) => error!("consumer group coordinator stopped: {}", e),
        }

        result
    }
}
