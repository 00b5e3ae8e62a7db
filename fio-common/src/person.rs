use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Enumeration of reasons an inbound payload cannot be turned into a `NameRecord`.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not a valid name record: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("required field {0} is missing or empty")]
    MissingField(&'static str),
}

/// A full name as it arrives on the inbound topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patronymic: Option<String>,
}

impl NameRecord {
    pub fn new(name: &str, surname: &str, patronymic: Option<&str>) -> Self {
        Self {
            name: name.to_owned(),
            surname: surname.to_owned(),
            patronymic: patronymic.map(str::to_owned),
        }
    }

    /// Decode a JSON payload, rejecting records without a name or surname.
    /// An empty patronymic is treated as absent.
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut record: NameRecord = serde_json::from_slice(payload)?;
        record.validate()?;
        record.patronymic = record.patronymic.filter(|p| !p.trim().is_empty());

        Ok(record)
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.name.trim().is_empty() {
            return Err(DecodeError::MissingField("name"));
        }
        if self.surname.trim().is_empty() {
            return Err(DecodeError::MissingField("surname"));
        }
        Ok(())
    }
}

/// A `NameRecord` with every inferred attribute filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: NameRecord,
    pub age: i32,
    pub gender: String,
    pub nationality: String,
}

/// A persisted `EnrichedRecord`, as returned by the query API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Person {
    pub id: i32,
    pub name: String,
    pub surname: String,
    pub patronymic: Option<String>,
    pub age: i32,
    pub gender: String,
    pub nationality: String,
}

impl Person {
    pub fn from_enriched(id: i32, enriched: EnrichedRecord) -> Self {
        Self {
            id,
            name: enriched.record.name,
            surname: enriched.record.surname,
            patronymic: enriched.record.patronymic,
            age: enriched.age,
            gender: enriched.gender,
            nationality: enriched.nationality,
        }
    }
}
