use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use thiserror::Error;

use crate::person::{EnrichedRecord, Person};

/// Enumeration of errors for operations with a `RecordStore`.
/// Errors that originate from sqlx are wrapped to provide additional context.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("migrations failed with: {error}")]
    MigrationError { error: sqlx::migrate::MigrateError },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("entry doesn't exist")]
    NotFound,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FilterError {
    #[error("{0} is not a filterable field")]
    UnknownField(String),
    #[error("{value} is not a valid value for {field}")]
    InvalidValue { field: String, value: String },
}

/// Equality filter over one of the stored columns, carrying a value of that column's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersonFilter {
    Id(i32),
    Name(String),
    Surname(String),
    Patronymic(String),
    Age(i32),
    Gender(String),
    Nationality(String),
}

impl PersonFilter {
    /// Build a filter from a field name and its textual value, as received in a query string.
    pub fn parse(field: &str, value: &str) -> Result<Self, FilterError> {
        let number = || {
            value.parse::<i32>().map_err(|_| FilterError::InvalidValue {
                field: field.to_owned(),
                value: value.to_owned(),
            })
        };

        match field {
            "id" => Ok(PersonFilter::Id(number()?)),
            "name" => Ok(PersonFilter::Name(value.to_owned())),
            "surname" => Ok(PersonFilter::Surname(value.to_owned())),
            "patronymic" => Ok(PersonFilter::Patronymic(value.to_owned())),
            "age" => Ok(PersonFilter::Age(number()?)),
            "gender" => Ok(PersonFilter::Gender(value.to_owned())),
            "nationality" => Ok(PersonFilter::Nationality(value.to_owned())),
            unknown => Err(FilterError::UnknownField(unknown.to_owned())),
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            PersonFilter::Id(_) => "id",
            PersonFilter::Name(_) => "name",
            PersonFilter::Surname(_) => "surname",
            PersonFilter::Patronymic(_) => "patronymic",
            PersonFilter::Age(_) => "age",
            PersonFilter::Gender(_) => "gender",
            PersonFilter::Nationality(_) => "nationality",
        }
    }
}

/// Persistence of enriched records. Shared by all partition workers and the query API.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new row and return its id. Saving the same record twice creates two rows.
    async fn save(&self, record: &EnrichedRecord) -> Result<i32, StorageError>;

    /// Rows matching `filter` ordered by id, paginated by offset.
    /// An empty result is reported as `StorageError::NotFound`.
    async fn get(
        &self,
        filter: Option<&PersonFilter>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Person>, StorageError>;
}

/// A `RecordStore` backed by the `people` table in PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| StorageError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `people` table if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await
            .map_err(|error| StorageError::MigrationError { error })
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn save(&self, record: &EnrichedRecord) -> Result<i32, StorageError> {
        let id: i32 = sqlx::query_scalar(
            r#"
INSERT INTO people
    (name, surname, patronymic, age, gender, nationality)
VALUES
    ($1, $2, $3, $4, $5, $6)
RETURNING
    id
            "#,
        )
        .bind(&record.record.name)
        .bind(&record.record.surname)
        .bind(&record.record.patronymic)
        .bind(record.age)
        .bind(&record.gender)
        .bind(&record.nationality)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| StorageError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(id)
    }

    async fn get(
        &self,
        filter: Option<&PersonFilter>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Person>, StorageError> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, name, surname, patronymic, age, gender, nationality FROM people",
        );

        if let Some(filter) = filter {
            // Column names come from a closed set, only the value is user input.
            query.push(" WHERE ").push(filter.column()).push(" = ");
            match filter {
                PersonFilter::Id(value) | PersonFilter::Age(value) => {
                    query.push_bind(*value);
                }
                PersonFilter::Name(value)
                | PersonFilter::Surname(value)
                | PersonFilter::Patronymic(value)
                | PersonFilter::Gender(value)
                | PersonFilter::Nationality(value) => {
                    query.push_bind(value.clone());
                }
            }
        }

        query
            .push(" ORDER BY id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let people: Vec<Person> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StorageError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        if people.is_empty() {
            return Err(StorageError::NotFound);
        }

        Ok(people)
    }
}
