pub mod clickhouse;
pub mod domain;
pub mod mqtt;
pub mod nats;
pub mod telemetry;
