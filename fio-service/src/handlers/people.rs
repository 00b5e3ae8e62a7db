use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use fio_common::person::Person;
use fio_common::store::{PersonFilter, RecordStore, StorageError};

const DEFAULT_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct PeopleQuery {
    filter: Option<String>,
    eq: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum ResponseStatus {
    #[serde(rename = "OK")]
    Ok,
    Error,
}

/// Envelope of every `/people` response.
#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PeopleResponse {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub people: Option<Vec<Person>>,
}

impl PeopleResponse {
    fn ok(people: Vec<Person>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            error: None,
            people: Some(people),
        }
    }

    fn error(error: String) -> Self {
        Self {
            status: ResponseStatus::Error,
            error: Some(error),
            people: None,
        }
    }
}

// Missing, malformed and negative values fall back to the default
fn parse_or(value: Option<&str>, default: i64, min: i64) -> i64 {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v >= min)
        .unwrap_or(default)
}

/// `GET /people?filter=<field>&eq=<value>&limit=<n>&offset=<n>`
///
/// A page with no matching people answers 404 with the error envelope rather than
/// 200 with an empty list, so clients can tell an exhausted filter from a short page.
pub async fn get(
    State(store): State<Arc<dyn RecordStore>>,
    Query(query): Query<PeopleQuery>,
) -> (StatusCode, Json<PeopleResponse>) {
    let limit = parse_or(query.limit.as_deref(), DEFAULT_LIMIT, 1);
    let offset = parse_or(query.offset.as_deref(), 0, 0);

    let filter = match query.filter.as_deref().filter(|field| !field.is_empty()) {
        None => None,
        Some(field) => {
            match PersonFilter::parse(field, query.eq.as_deref().unwrap_or_default()) {
                Ok(filter) => Some(filter),
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(PeopleResponse::error(format!("invalid filter: {}", e))),
                    )
                }
            }
        }
    };

    match store.get(filter.as_ref(), limit, offset).await {
        Ok(people) => (StatusCode::OK, Json(PeopleResponse::ok(people))),
        Err(StorageError::NotFound) => {
            debug!("no people matching {:?}", filter);
            (
                StatusCode::NOT_FOUND,
                Json(PeopleResponse::error(StorageError::NotFound.to_string())),
            )
        }
        Err(e) => {
            error!("failed to get people: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PeopleResponse::error("internal error".to_owned())),
            )
        }
    }
}
