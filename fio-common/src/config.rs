use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

/// Endpoints of the name lookup services used to enrich records.
#[derive(Envconfig, Clone, Debug)]
pub struct EnrichmentConfig {
    #[envconfig(from = "AGIFY_URL", default = "https://api.agify.io")]
    pub agify_url: String,

    #[envconfig(from = "GENDERIZE_URL", default = "https://api.genderize.io")]
    pub genderize_url: String,

    #[envconfig(from = "NATIONALIZE_URL", default = "https://api.nationalize.io")]
    pub nationalize_url: String,

    /// Applies to each lookup separately, not to the whole enrichment.
    #[envconfig(from = "ENRICHMENT_TIMEOUT", default = "5000")]
    pub timeout: EnvMsDuration,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
