pub mod config;
pub mod enrichment;
pub mod health;
pub mod kafka_producer;
pub mod logging;
pub mod metrics;
pub mod person;
pub mod publisher;
pub mod store;
