use std::time::Instant;

use async_trait::async_trait;
use reqwest::header;
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

use crate::config::EnrichmentConfig;
use crate::person::{EnrichedRecord, NameRecord};

/// Enumeration of errors returned by name lookups.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("{service} lookup failed: {error}")]
    RequestError {
        service: &'static str,
        error: reqwest::Error,
    },
    #[error("{service} returned no {field} for the requested name")]
    MissingValue {
        service: &'static str,
        field: &'static str,
    },
}

/// Infers attributes of a person from their given name.
///
/// Implementations are shared by every partition worker, so they must be safe for concurrent use.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn age(&self, name: &str) -> Result<i32, LookupError>;

    async fn gender(&self, name: &str) -> Result<String, LookupError>;

    /// Country code with the highest probability for this name.
    async fn nationality(&self, name: &str) -> Result<String, LookupError>;

    /// Run all three lookups one after the other. The first failing lookup aborts the
    /// enrichment, so a partially enriched record is never produced.
    async fn enrich(&self, record: NameRecord) -> Result<EnrichedRecord, LookupError> {
        let age = self.age(&record.name).await?;
        let gender = self.gender(&record.name).await?;
        let nationality = self.nationality(&record.name).await?;

        Ok(EnrichedRecord {
            record,
            age,
            gender,
            nationality,
        })
    }
}

#[derive(Deserialize)]
struct AgeResponse {
    age: Option<i32>,
}

#[derive(Deserialize)]
struct GenderResponse {
    gender: Option<String>,
}

#[derive(Deserialize)]
struct NationalityResponse {
    #[serde(default)]
    country: Vec<CountryProbability>,
}

#[derive(Deserialize)]
struct CountryProbability {
    country_id: String,
    probability: f64,
}

/// `EnrichmentProvider` backed by the agify, genderize and nationalize HTTP APIs.
pub struct HttpEnrichmentProvider {
    client: reqwest::Client,
    agify_url: String,
    genderize_url: String,
    nationalize_url: String,
}

impl HttpEnrichmentProvider {
    pub fn new(config: &EnrichmentConfig) -> Result<Self, reqwest::Error> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("fio-service")
            .timeout(config.timeout.0)
            .build()?;

        Ok(Self {
            client,
            agify_url: config.agify_url.to_owned(),
            genderize_url: config.genderize_url.to_owned(),
            nationalize_url: config.nationalize_url.to_owned(),
        })
    }

    async fn lookup<T: DeserializeOwned>(
        &self,
        service: &'static str,
        url: &str,
        name: &str,
    ) -> Result<T, LookupError> {
        let start = Instant::now();
        let result = fetch(&self.client, url, name).await;

        let labels = [("service", service.to_owned())];
        metrics::histogram!("fio_enrichment_duration_seconds", &labels)
            .record(start.elapsed().as_secs_f64());

        result.map_err(|error| LookupError::RequestError { service, error })
    }
}

async fn fetch<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    name: &str,
) -> Result<T, reqwest::Error> {
    client
        .get(url)
        .query(&[("name", name)])
        .send()
        .await?
        .error_for_status()?
        .json::<T>()
        .await
}

#[async_trait]
impl EnrichmentProvider for HttpEnrichmentProvider {
    async fn age(&self, name: &str) -> Result<i32, LookupError> {
        let response: AgeResponse = self.lookup("agify", &self.agify_url, name).await?;

        response.age.ok_or(LookupError::MissingValue {
            service: "agify",
            field: "age",
        })
    }

    async fn gender(&self, name: &str) -> Result<String, LookupError> {
        let response: GenderResponse = self.lookup("genderize", &self.genderize_url, name).await?;

        response.gender.ok_or(LookupError::MissingValue {
            service: "genderize",
            field: "gender",
        })
    }

    async fn nationality(&self, name: &str) -> Result<String, LookupError> {
        let response: NationalityResponse = self
            .lookup("nationalize", &self.nationalize_url, name)
            .await?;

        response
            .country
            .into_iter()
            .max_by(|a, b| a.probability.total_cmp(&b.probability))
            .map(|country| country.country_id)
            .ok_or(LookupError::MissingValue {
                service: "nationalize",
                field: "country",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvMsDuration;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn provider_for(server: &MockServer, timeout: Duration) -> HttpEnrichmentProvider {
        let config = EnrichmentConfig {
            agify_url: server.url("/agify"),
            genderize_url: server.url("/genderize"),
            nationalize_url: server.url("/nationalize"),
            timeout: EnvMsDuration(timeout),
        };
        HttpEnrichmentProvider::new(&config).expect("failed to build provider")
    }

    #[tokio::test]
    async fn enrich_fills_every_attribute() {
        let server = MockServer::start_async().await;
        let agify = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/agify")
                    .query_param("name", "Dmitriy");
                then.status(200)
                    .json_body(json!({"count": 1, "name": "Dmitriy", "age": 30}));
            })
            .await;
        let genderize = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/genderize")
                    .query_param("name", "Dmitriy");
                then.status(200).json_body(
                    json!({"count": 1, "name": "Dmitriy", "gender": "male", "probability": 1.0}),
                );
            })
            .await;
        let nationalize = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/nationalize")
                    .query_param("name", "Dmitriy");
                then.status(200).json_body(json!({
                    "count": 1,
                    "name": "Dmitriy",
                    "country": [
                        {"country_id": "UA", "probability": 0.2},
                        {"country_id": "RU", "probability": 0.6},
                        {"country_id": "BY", "probability": 0.1},
                    ]
                }));
            })
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));
        let record = NameRecord::new("Dmitriy", "Ushakov", Some("Vasilevich"));

        let enriched = provider
            .enrich(record.clone())
            .await
            .expect("failed to enrich record");

        assert_eq!(enriched.record, record);
        assert_eq!(enriched.age, 30);
        assert_eq!(enriched.gender, "male");
        assert_eq!(enriched.nationality, "RU");
        agify.assert_async().await;
        genderize.assert_async().await;
        nationalize.assert_async().await;
    }

    #[tokio::test]
    async fn missing_values_are_lookup_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/agify");
                then.status(200)
                    .json_body(json!({"count": 0, "name": "Zzyzx", "age": null}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/nationalize");
                then.status(200)
                    .json_body(json!({"count": 0, "name": "Zzyzx", "country": []}));
            })
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));

        match provider.age("Zzyzx").await {
            Err(LookupError::MissingValue { field: "age", .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        match provider.nationality("Zzyzx").await {
            Err(LookupError::MissingValue {
                field: "country", ..
            }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn first_failure_aborts_enrichment() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/agify");
                then.status(200).json_body(json!({"age": 41}));
            })
            .await;
        let genderize = server
            .mock_async(|when, then| {
                when.method(GET).path("/genderize");
                then.status(500);
            })
            .await;
        let nationalize = server
            .mock_async(|when, then| {
                when.method(GET).path("/nationalize");
                then.status(200)
                    .json_body(json!({"country": [{"country_id": "RU", "probability": 0.9}]}));
            })
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));

        match provider
            .enrich(NameRecord::new("Dmitriy", "Ushakov", None))
            .await
        {
            Err(LookupError::RequestError {
                service: "genderize",
                ..
            }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        genderize.assert_async().await;
        assert_eq!(nationalize.hits_async().await, 0);
    }

    #[tokio::test]
    async fn slow_lookup_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/agify");
                then.status(200)
                    .delay(Duration::from_secs(2))
                    .json_body(json!({"age": 30}));
            })
            .await;

        let provider = provider_for(&server, Duration::from_millis(100));

        match provider.age("Dmitriy").await {
            Err(LookupError::RequestError { error, .. }) => assert!(error.is_timeout()),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_response_is_lookup_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/genderize");
                then.status(200).body("<html>not json</html>");
            })
            .await;

        let provider = provider_for(&server, Duration::from_secs(5));

        assert!(matches!(
            provider.gender("Dmitriy").await,
            Err(LookupError::RequestError {
                service: "genderize",
                ..
            })
        ));
    }
}
