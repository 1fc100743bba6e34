use common::clickhouse::ClickHouseSettings;
use common::mqtt::MqttSettings;
use common::nats::{ConsumerSettings, StreamSettings};
use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // OpenTelemetry configuration
    /// OTLP gRPC endpoint for traces and logs
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Export traces and logs over OTLP
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// JetStream stream carrying MO messages from the satellite network
    #[serde(default = "default_nats_mo_stream")]
    pub nats_mo_stream: String,

    #[serde(default = "default_nats_mo_subject")]
    pub nats_mo_subject: String,

    /// JetStream stream carrying MT delivery status reports
    #[serde(default = "default_nats_status_stream")]
    pub nats_status_stream: String,

    #[serde(default = "default_nats_status_subject")]
    pub nats_status_subject: String,

    /// JetStream stream carrying new MT table rows
    #[serde(default = "default_nats_mt_change_stream")]
    pub nats_mt_change_stream: String,

    #[serde(default = "default_nats_mt_change_subject")]
    pub nats_mt_change_subject: String,

    /// JetStream stream the MT send requests are forwarded to
    #[serde(default = "default_nats_mt_egress_stream")]
    pub nats_mt_egress_stream: String,

    #[serde(default = "default_nats_mt_egress_subject")]
    pub nats_mt_egress_subject: String,

    /// JetStream stream receiving error reports, one subject per route
    #[serde(default = "default_nats_errors_stream")]
    pub nats_errors_stream: String,

    /// Error reports are published on `<subject>.<route>`
    #[serde(default = "default_nats_errors_subject")]
    pub nats_errors_subject: String,

    #[serde(default = "default_mo_consumer_name")]
    pub mo_consumer_name: String,

    #[serde(default = "default_status_consumer_name")]
    pub status_consumer_name: String,

    #[serde(default = "default_mt_change_consumer_name")]
    pub mt_change_consumer_name: String,

    /// Batch size for consumers
    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Seconds before an unacknowledged message is redelivered
    #[serde(default = "default_nats_ack_wait_secs")]
    pub nats_ack_wait_secs: u64,

    /// Delivery attempts per message, -1 for unlimited
    #[serde(default = "default_nats_max_deliver")]
    pub nats_max_deliver: i64,

    /// Window in which the MT egress stream drops repeated request references
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    // MQTT configuration (device network)
    /// MQTT broker URL (mqtt://host:port)
    #[serde(default = "default_mqtt_broker_url")]
    pub mqtt_broker_url: String,

    /// Client id prefix; each connection appends its role
    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    /// Consecutive failed sessions before the MT subscriber gives up
    #[serde(default = "default_mqtt_max_retry_attempts")]
    pub mqtt_max_retry_attempts: u32,

    #[serde(default = "default_mqtt_retry_delay_secs")]
    pub mqtt_retry_delay_secs: u64,

    /// Subscribe to `<prefix>/+/mt` and capture MT sends into the MT table
    #[serde(default = "default_mt_capture_enabled")]
    pub mt_capture_enabled: bool,

    // Device network
    /// Topic prefix for device addressing, e.g. CloudConnect
    #[serde(default = "default_iot_prefix")]
    pub iot_prefix: String,

    /// Topic id assigned by the satellite network, copied onto every MT send
    #[serde(default = "default_topic_id")]
    pub topic_id: i64,

    /// Account stamped onto envelopes and matched by every rule
    #[serde(default = "default_account_id")]
    pub account_id: String,

    #[serde(default)]
    pub device_network_region: String,

    #[serde(default)]
    pub device_network_subdomain: String,

    // ClickHouse configuration
    /// ClickHouse HTTP URL
    #[serde(default = "default_clickhouse_url")]
    pub clickhouse_url: String,

    #[serde(default = "default_clickhouse_database")]
    pub clickhouse_database: String,

    #[serde(default = "default_clickhouse_username")]
    pub clickhouse_username: String,

    #[serde(default = "default_clickhouse_password")]
    pub clickhouse_password: String,

    /// Physical table holding every delivery record
    #[serde(default = "default_clickhouse_table")]
    pub clickhouse_table: String,

    #[serde(default = "default_mo_table")]
    pub mo_table: String,

    #[serde(default = "default_mt_table")]
    pub mt_table: String,

    #[serde(default = "default_status_table")]
    pub status_table: String,

    // Delivery policy
    /// Per-attempt sink timeout in seconds
    #[serde(default = "default_sink_timeout_secs")]
    pub sink_timeout_secs: u64,

    /// Attempts per delivery for storage and queue sinks (1 = no retry)
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "imt-all-in-one".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_nats_mo_stream() -> String {
    "imt_mo".to_string()
}

fn default_nats_mo_subject() -> String {
    "imt.mo".to_string()
}

fn default_nats_status_stream() -> String {
    "imt_status".to_string()
}

fn default_nats_status_subject() -> String {
    "imt.status".to_string()
}

fn default_nats_mt_change_stream() -> String {
    "imt_mt_changes".to_string()
}

fn default_nats_mt_change_subject() -> String {
    "imt.mt.changes".to_string()
}

fn default_nats_mt_egress_stream() -> String {
    "imt_mt_egress".to_string()
}

fn default_nats_mt_egress_subject() -> String {
    "imt.mt.send".to_string()
}

fn default_nats_errors_stream() -> String {
    "imt_errors".to_string()
}

fn default_nats_errors_subject() -> String {
    "imt.errors".to_string()
}

fn default_mo_consumer_name() -> String {
    "imt_mo_adapter".to_string()
}

fn default_status_consumer_name() -> String {
    "imt_status_adapter".to_string()
}

fn default_mt_change_consumer_name() -> String {
    "imt_mt_change_adapter".to_string()
}

fn default_nats_batch_size() -> usize {
    1
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_nats_ack_wait_secs() -> u64 {
    30
}

fn default_nats_max_deliver() -> i64 {
    -1
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_mqtt_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_mqtt_client_id() -> String {
    "imt-fabric".to_string()
}

fn default_mqtt_keep_alive_secs() -> u64 {
    30
}

fn default_mqtt_max_retry_attempts() -> u32 {
    5
}

fn default_mqtt_retry_delay_secs() -> u64 {
    5
}

fn default_mt_capture_enabled() -> bool {
    true
}

fn default_iot_prefix() -> String {
    "CloudConnect".to_string()
}

fn default_topic_id() -> i64 {
    123
}

fn default_account_id() -> String {
    "local".to_string()
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_database() -> String {
    "imt".to_string()
}

fn default_clickhouse_username() -> String {
    "default".to_string()
}

fn default_clickhouse_password() -> String {
    String::new()
}

fn default_clickhouse_table() -> String {
    "delivery_records".to_string()
}

fn default_mo_table() -> String {
    "imt_mo".to_string()
}

fn default_mt_table() -> String {
    "imt_mt".to_string()
}

fn default_status_table() -> String {
    "imt_status".to_string()
}

fn default_sink_timeout_secs() -> u64 {
    10
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_backoff_ms() -> u64 {
    200
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("IMT"))
            .build()?
            .try_deserialize()
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            otel_endpoint: self.otel_endpoint.clone(),
            otel_enabled: self.otel_enabled,
            log_level: self.log_level.clone(),
            resource_attributes: Vec::new(),
        }
        .with_resource_attribute("imt.account", &self.account_id)
        .with_resource_attribute("imt.device_network.region", &self.device_network_region)
    }

    pub fn clickhouse(&self) -> ClickHouseSettings {
        ClickHouseSettings {
            url: self.clickhouse_url.clone(),
            database: self.clickhouse_database.clone(),
            username: self.clickhouse_username.clone(),
            password: self.clickhouse_password.clone(),
        }
    }

    pub fn mqtt(&self) -> MqttSettings {
        MqttSettings {
            broker_url: self.mqtt_broker_url.clone(),
            client_id: self.mqtt_client_id.clone(),
            keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
            max_retry_attempts: self.mqtt_max_retry_attempts,
            retry_delay: Duration::from_secs(self.mqtt_retry_delay_secs),
        }
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    /// Every stream the service publishes to or consumes from.
    pub fn streams(&self) -> Vec<StreamSettings> {
        vec![
            StreamSettings::new(&self.nats_mo_stream, &self.nats_mo_subject)
                .with_description("MO messages from the satellite network"),
            StreamSettings::new(&self.nats_status_stream, &self.nats_status_subject)
                .with_description("MT delivery status reports"),
            StreamSettings::new(&self.nats_mt_change_stream, &self.nats_mt_change_subject)
                .with_description("New rows of the MT table")
                .with_duplicate_window(self.dedup_window()),
            StreamSettings::new(&self.nats_mt_egress_stream, &self.nats_mt_egress_subject)
                .with_description("MT send requests, deduplicated by request reference")
                .with_duplicate_window(self.dedup_window()),
            StreamSettings::new(
                &self.nats_errors_stream,
                format!("{}.>", self.nats_errors_subject),
            )
            .with_description("Error reports"),
        ]
    }

    pub fn mo_consumer(&self) -> ConsumerSettings {
        self.consumer(
            &self.nats_mo_stream,
            &self.mo_consumer_name,
            &self.nats_mo_subject,
        )
    }

    pub fn status_consumer(&self) -> ConsumerSettings {
        self.consumer(
            &self.nats_status_stream,
            &self.status_consumer_name,
            &self.nats_status_subject,
        )
    }

    pub fn mt_change_consumer(&self) -> ConsumerSettings {
        self.consumer(
            &self.nats_mt_change_stream,
            &self.mt_change_consumer_name,
            &self.nats_mt_change_subject,
        )
    }

    fn consumer(&self, stream: &str, name: &str, subject: &str) -> ConsumerSettings {
        ConsumerSettings {
            stream_name: stream.to_string(),
            consumer_name: name.to_string(),
            filter_subject: subject.to_string(),
            batch_size: self.nats_batch_size,
            max_wait: Duration::from_secs(self.nats_batch_wait_secs),
            ack_wait: Duration::from_secs(self.nats_ack_wait_secs),
            max_deliver: self.nats_max_deliver,
        }
    }
}
