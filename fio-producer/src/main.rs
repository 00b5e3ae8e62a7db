//! Publishes a single name record to the inbound topic, for trying out a running fio-service.

use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tracing::info;

use fio_common::config::KafkaConfig;
use fio_common::kafka_producer::{create_kafka_producer, send_keyed, KafkaContext};
use fio_common::logging::init_tracing;
use fio_common::person::NameRecord;

#[derive(Envconfig)]
struct Config {
    #[envconfig(nested = true)]
    kafka: KafkaConfig,

    #[envconfig(default = "fio-topic")]
    kafka_topic: String,

    #[envconfig(default = "Data")]
    message_key: String,

    #[envconfig(default = "Dmitriy")]
    name: String,

    #[envconfig(default = "Ushakov")]
    surname: String,

    // Left out of the record when empty
    #[envconfig(default = "Vasilevich")]
    patronymic: String,

    #[envconfig(default = "false")]
    log_json: bool,
}

impl Config {
    fn record(&self) -> NameRecord {
        let patronymic = Some(self.patronymic.as_str()).filter(|p| !p.is_empty());
        NameRecord::new(&self.name, &self.surname, patronymic)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;
    init_tracing(config.log_json);

    let payload = serde_json::to_vec(&config.record())?;

    let producer = create_kafka_producer(&config.kafka, KafkaContext::default())
        .await
        .wrap_err("failed to create kafka producer")?;
    let (partition, offset) = send_keyed(
        &producer,
        &config.kafka_topic,
        &config.message_key,
        &payload,
    )
    .await?;

    info!(
        "message with key {} sent to {} (partition {}, offset {})",
        config.message_key, config.kafka_topic, partition, offset
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_record() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.message_key, "Data");
        assert_eq!(
            config.record(),
            NameRecord::new("Dmitriy", "Ushakov", Some("Vasilevich"))
        );
    }

    #[test]
    fn empty_patronymic_is_omitted() {
        let env = HashMap::from([("PATRONYMIC".to_owned(), String::new())]);
        let config = Config::init_from_hashmap(&env).unwrap();

        let payload = serde_json::to_string(&config.record()).unwrap();
        assert_eq!(payload, r#"{"name":"Dmitriy","surname":"Ushakov"}"#);
    }
}
