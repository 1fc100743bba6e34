//! Templates and rules of the IMT fabric.
//!
//! Three rules, one per route, each scoped to the configured account:
//!
//! - `imt_mo_rule`: MO record into the MO table, MO message to `<prefix>/<cmid>/mo`
//! - `imt_mt_rule`: MT send request onto the MT egress queue, grouped and
//!   deduplicated by request reference
//! - `imt_status_rule`: status record into the status table, status to
//!   `<prefix>/<cmid>/status/<requestReference>`

use crate::config::ServiceConfig;
use common::domain::{attributes, routes, FabricResult, ItemStore, TableSpec};
use egress::{DevicePublishSink, DevicePublisher, StoragePutSink, TopicTemplate};
use event_bus::{
    ErrorSink, EventBus, EventPattern, FieldKind, OrderingLayer, PathBinding, RetryPolicy, Rule,
    Sink, SourceExpr, TargetBinding, TransformTemplate,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const MO_RULE: &str = "imt_mo_rule";
pub const MT_RULE: &str = "imt_mt_rule";
pub const STATUS_RULE: &str = "imt_status_rule";

pub const MO_STORAGE_TARGET: &str = "mo_storage";
pub const MO_DEVICE_TARGET: &str = "mo_device";
pub const MT_QUEUE_TARGET: &str = "mt_queue";
pub const STATUS_STORAGE_TARGET: &str = "status_storage";
pub const STATUS_DEVICE_TARGET: &str = "status_device";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub account: String,
    pub iot_prefix: String,
    pub topic_id: i64,
    pub mo_table: String,
    pub status_table: String,
    pub sink_timeout: Duration,
    /// Applied to the storage and queue targets; device publishes are one-shot
    pub retry: RetryPolicy,
}

impl From<&ServiceConfig> for PipelineConfig {
    fn from(config: &ServiceConfig) -> Self {
        let retry = if config.retry_max_attempts > 1 {
            RetryPolicy::exponential(
                config.retry_max_attempts,
                Duration::from_millis(config.retry_initial_backoff_ms),
            )
        } else {
            RetryPolicy::none()
        };

        Self {
            account: config.account_id.clone(),
            iot_prefix: config.iot_prefix.clone(),
            topic_id: config.topic_id,
            mo_table: config.mo_table.clone(),
            status_table: config.status_table.clone(),
            sink_timeout: Duration::from_secs(config.sink_timeout_secs),
            retry,
        }
    }
}

/// The external systems the rules deliver to.
pub struct PipelineSinks {
    pub store: Arc<dyn ItemStore>,
    pub devices: Arc<dyn DevicePublisher>,
    /// Queue-forward sink of the MT egress stream
    pub mt_queue: Arc<dyn Sink>,
}

pub fn mo_table(config: &PipelineConfig) -> TableSpec {
    TableSpec::new(&config.mo_table, "cmid", "transmissionEndTime")
}

pub fn status_table(config: &PipelineConfig) -> TableSpec {
    TableSpec::new(&config.status_table, "requestReference", "ts")
}

/// MO table record, keyed `(cmid, transmissionEndTime)`.
pub fn mo_record_template() -> TransformTemplate {
    TransformTemplate::new("mo_record")
        .required("cmid", SourceExpr::body("cmid"), FieldKind::String)
        .required("billingReference", SourceExpr::body("billingReference"), FieldKind::String)
        .required("location", SourceExpr::body("location"), FieldKind::String)
        .required("messageId", SourceExpr::body("messageId"), FieldKind::Number)
        .required("originatorCrcError", SourceExpr::body("originatorCrcError"), FieldKind::Bool)
        .required("payload", SourceExpr::body("payload"), FieldKind::String)
        .required("topicId", SourceExpr::body("topicId"), FieldKind::Number)
        .required("transmissionStartTime", SourceExpr::body("transmissionStartTime"), FieldKind::String)
        .required("transmissionEndTime", SourceExpr::body("transmissionEndTime"), FieldKind::String)
        .required("version", SourceExpr::body("version"), FieldKind::String)
}

/// MO message as devices see it on `<prefix>/<cmid>/mo`.
pub fn mo_device_template() -> TransformTemplate {
    TransformTemplate::new("mo_device")
        .required("cmid", SourceExpr::body("cmid"), FieldKind::String)
        .optional("messageId", SourceExpr::body("messageId"), FieldKind::Json)
        .required("payload", SourceExpr::body("payload"), FieldKind::String)
        .optional("topicId", SourceExpr::body("topicId"), FieldKind::Json)
        .optional("location", SourceExpr::body("location"), FieldKind::Json)
        .optional("transmissionStartTime", SourceExpr::body("transmissionStartTime"), FieldKind::String)
        .required("transmissionEndTime", SourceExpr::body("transmissionEndTime"), FieldKind::String)
}

/// MT send request built from the new image of an MT table row.
///
/// `requestReference` is optional here so that a row without one fails at
/// the ordering layer with a missing group key.
pub fn mt_send_template(topic_id: i64) -> TransformTemplate {
    TransformTemplate::new("mt_send")
        .required("cmid", SourceExpr::body("cmid"), FieldKind::String)
        .required("topicId", SourceExpr::literal(topic_id), FieldKind::Number)
        .required("payload", SourceExpr::body("message.payload"), FieldKind::String)
        .optional("requestReference", SourceExpr::body("message.requestReference"), FieldKind::String)
        .optional("ringStyle", SourceExpr::body("message.ringStyle"), FieldKind::String)
}

/// Status table record, keyed `(requestReference, ts)` with `ts` the queue's
/// `SentTimestamp`, plus the transport attributes as strings.
pub fn status_record_template() -> TransformTemplate {
    let template = TransformTemplate::new("status_record")
        .required("requestReference", SourceExpr::body("requestReference"), FieldKind::String)
        .required("ts", SourceExpr::attribute(attributes::SENT_TIMESTAMP), FieldKind::Number)
        .required("cmid", SourceExpr::body("cmid"), FieldKind::String)
        .required("deliveryStatus", SourceExpr::body("deliveryStatus"), FieldKind::String)
        .optional("messageId", SourceExpr::body("messageId"), FieldKind::Number)
        .required("messagePending", SourceExpr::body("messagePending"), FieldKind::Bool)
        .required("topicId", SourceExpr::body("topicId"), FieldKind::Number)
        .required("version", SourceExpr::body("version"), FieldKind::String);

    attributes::TRANSPORT.iter().fold(template, |template, name| {
        template.optional(
            &format!("attributes.{}", name),
            SourceExpr::attribute(*name),
            FieldKind::String,
        )
    })
}

/// Status as devices see it on `<prefix>/<cmid>/status/<requestReference>`.
pub fn status_device_template() -> TransformTemplate {
    TransformTemplate::new("status_device")
        .required("cmid", SourceExpr::body("cmid"), FieldKind::String)
        .required("requestReference", SourceExpr::body("requestReference"), FieldKind::String)
        .required("deliveryStatus", SourceExpr::body("deliveryStatus"), FieldKind::String)
        .optional("messageId", SourceExpr::body("messageId"), FieldKind::Json)
        .optional("messagePending", SourceExpr::body("messagePending"), FieldKind::Json)
        .optional("topicId", SourceExpr::body("topicId"), FieldKind::Json)
}

fn scoped(route: &str, account: &str) -> EventPattern {
    EventPattern::route(route).with_attribute(attributes::ACCOUNT, [account])
}

fn device_sink(
    devices: &Arc<dyn DevicePublisher>,
    topic: &str,
) -> FabricResult<Arc<dyn Sink>> {
    let topic = TopicTemplate::parse(topic)?;
    Ok(Arc::new(DevicePublishSink::new(Arc::clone(devices), topic)))
}

pub fn mo_rule(config: &PipelineConfig, sinks: &PipelineSinks) -> FabricResult<Rule> {
    let storage: Arc<dyn Sink> =
        Arc::new(StoragePutSink::new(Arc::clone(&sinks.store), mo_table(config)));
    let device = device_sink(&sinks.devices, &format!("{}/{{cmid}}/mo", config.iot_prefix))?;

    Ok(Rule::new(MO_RULE, scoped(routes::MO, &config.account))
        .with_target(
            TargetBinding::new(MO_STORAGE_TARGET, storage, mo_record_template())
                .with_timeout(config.sink_timeout)
                .with_retry(config.retry),
        )
        .with_target(
            TargetBinding::new(MO_DEVICE_TARGET, device, mo_device_template())
                .with_path(PathBinding::new().bind("cmid", SourceExpr::body("cmid")))
                .with_timeout(config.sink_timeout),
        ))
}

pub fn mt_rule(config: &PipelineConfig, sinks: &PipelineSinks) -> Rule {
    Rule::new(MT_RULE, scoped(routes::MT_CHANGE, &config.account)).with_target(
        TargetBinding::new(
            MT_QUEUE_TARGET,
            Arc::clone(&sinks.mt_queue),
            mt_send_template(config.topic_id),
        )
        .with_ordering(OrderingLayer::new(SourceExpr::body("message.requestReference")))
        .with_timeout(config.sink_timeout)
        .with_retry(config.retry),
    )
}

pub fn status_rule(config: &PipelineConfig, sinks: &PipelineSinks) -> FabricResult<Rule> {
    let storage: Arc<dyn Sink> = Arc::new(StoragePutSink::new(
        Arc::clone(&sinks.store),
        status_table(config),
    ));
    let device = device_sink(
        &sinks.devices,
        &format!("{}/{{cmid}}/status/{{requestReference}}", config.iot_prefix),
    )?;

    Ok(Rule::new(STATUS_RULE, scoped(routes::STATUS, &config.account))
        .with_target(
            TargetBinding::new(STATUS_STORAGE_TARGET, storage, status_record_template())
                .with_timeout(config.sink_timeout)
                .with_retry(config.retry),
        )
        .with_target(
            TargetBinding::new(STATUS_DEVICE_TARGET, device, status_device_template())
                .with_path(
                    PathBinding::new()
                        .bind("cmid", SourceExpr::body("cmid"))
                        .bind("requestReference", SourceExpr::body("requestReference")),
                )
                .with_timeout(config.sink_timeout),
        ))
}

/// Registers the three rules. Fails on an invalid template or topic.
pub fn build_event_bus(
    config: &PipelineConfig,
    sinks: PipelineSinks,
    error_sink: Arc<dyn ErrorSink>,
) -> FabricResult<EventBus> {
    let bus = EventBus::builder(error_sink)
        .register(mo_rule(config, &sinks)?)?
        .register(mt_rule(config, &sinks))?
        .register(status_rule(config, &sinks)?)?
        .build();

    info!(
        account = %config.account,
        prefix = %config.iot_prefix,
        rules = bus.rules().len(),
        "event bus ready"
    );
    Ok(bus)
}
