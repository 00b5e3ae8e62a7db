use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};

use fio_common::enrichment::{EnrichmentProvider, LookupError};
use fio_common::kafka_producer::KafkaProduceError;
use fio_common::person::{EnrichedRecord, Person};
use fio_common::publisher::{ResponsePublisher, StatusMessage};
use fio_common::store::{PersonFilter, RecordStore, StorageError};

use crate::error::SessionError;
use crate::worker::{InboundMessage, Session, DATA_KEY};

pub const DMITRIY: &str =
    r#"{"name": "Dmitriy", "surname": "Ushakov", "patronymic": "Vasilevich"}"#;

pub fn data_message(offset: i64, payload: &str) -> InboundMessage {
    keyed_message(DATA_KEY, offset, payload)
}

pub fn keyed_message(key: &str, offset: i64, payload: &str) -> InboundMessage {
    InboundMessage {
        key: key.to_owned(),
        value: payload.as_bytes().to_vec(),
        partition: 0,
        offset,
    }
}

/// In-memory `RecordStore` assigning sequential ids.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Person>>,
    failing: bool,
}

impl MemoryStore {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn rows(&self) -> Vec<Person> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save(&self, record: &EnrichedRecord) -> Result<i32, StorageError> {
        if self.failing {
            return Err(StorageError::QueryError {
                command: "INSERT".to_owned(),
                error: sqlx::Error::PoolTimedOut,
            });
        }

        let mut rows = self.rows.lock().unwrap();
        let id = rows.len() as i32 + 1;
        rows.push(Person::from_enriched(id, record.clone()));
        Ok(id)
    }

    async fn get(
        &self,
        filter: Option<&PersonFilter>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Person>, StorageError> {
        let people: Vec<Person> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|person| filter.map_or(true, |filter| filter_matches(filter, person)))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        if people.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(people)
    }
}

fn filter_matches(filter: &PersonFilter, person: &Person) -> bool {
    match filter {
        PersonFilter::Id(id) => person.id == *id,
        PersonFilter::Name(name) => &person.name == name,
        PersonFilter::Surname(surname) => &person.surname == surname,
        PersonFilter::Patronymic(patronymic) => person.patronymic.as_ref() == Some(patronymic),
        PersonFilter::Age(age) => person.age == *age,
        PersonFilter::Gender(gender) => &person.gender == gender,
        PersonFilter::Nationality(nationality) => &person.nationality == nationality,
    }
}

/// Enrichment answering the same attributes for every name, or failing every age lookup.
pub struct StaticEnrichment {
    age: i32,
    gender: &'static str,
    nationality: &'static str,
    failing: bool,
    delay: Option<Duration>,
    lookups: AtomicUsize,
}

impl StaticEnrichment {
    pub fn new(age: i32, gender: &'static str, nationality: &'static str) -> Self {
        Self {
            age,
            gender,
            nationality,
            failing: false,
            delay: None,
            lookups: AtomicUsize::new(0),
        }
    }

    /// Every age lookup takes `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(42, "male", "RU")
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new(0, "", "")
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentProvider for StaticEnrichment {
    async fn age(&self, _name: &str) -> Result<i32, LookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(LookupError::MissingValue {
                service: "agify",
                field: "age",
            });
        }
        Ok(self.age)
    }

    async fn gender(&self, _name: &str) -> Result<String, LookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.gender.to_owned())
    }

    async fn nationality(&self, _name: &str) -> Result<String, LookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.nationality.to_owned())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<StatusMessage>>,
    failing: bool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<StatusMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponsePublisher for RecordingPublisher {
    async fn publish(&self, message: StatusMessage) -> Result<(), KafkaProduceError> {
        if self.failing {
            return Err(KafkaProduceError::KafkaProduceCanceled);
        }
        self.published.lock().unwrap().push(message);
        Ok(())
    }
}

/// Records marked offsets. A revoked session refuses every mark, like a session whose
/// partition was reassigned.
#[derive(Default)]
pub struct RecordingSession {
    marked: Mutex<Vec<i64>>,
    revoked: bool,
}

impl RecordingSession {
    pub fn revoked() -> Self {
        Self {
            revoked: true,
            ..Default::default()
        }
    }

    pub fn marked(&self) -> Vec<i64> {
        self.marked.lock().unwrap().clone()
    }
}

impl Session for RecordingSession {
    fn mark_message(&self, message: &InboundMessage) -> Result<(), SessionError> {
        if self.revoked {
            return Err(SessionError::OffsetStoreError(KafkaError::StoreOffset(
                RDKafkaErrorCode::State,
            )));
        }
        self.marked.lock().unwrap().push(message.offset);
        Ok(())
    }
}
