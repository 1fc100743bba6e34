use crate::{
    deliver_with_policy, Ack, Delivery, ErrorReport, ErrorSink, ItemLifecycle, ItemState, Rule,
    TargetBinding,
};
use common::domain::{Envelope, FabricError, FabricResult};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info_span, instrument, warn, Instrument};

/// Collects rules at startup and freezes them into an `EventBus`.
pub struct EventBusBuilder {
    rules: Vec<Rule>,
    error_sink: Arc<dyn ErrorSink>,
}

impl EventBusBuilder {
    pub fn new(error_sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            rules: Vec::new(),
            error_sink,
        }
    }

    /// Adds a rule. Configuration problems (no targets, duplicate names,
    /// invalid templates) are reported here rather than at dispatch time.
    pub fn register(mut self, rule: Rule) -> FabricResult<Self> {
        rule.validate()?;
        if self.rules.iter().any(|existing| existing.name == rule.name) {
            return Err(FabricError::Configuration(format!(
                "rule {} is already registered",
                rule.name
            )));
        }
        debug!(
            rule = %rule.name,
            targets = rule.targets.len(),
            "registered rule"
        );
        self.rules.push(rule);
        Ok(self)
    }

    pub fn build(self) -> EventBus {
        EventBus {
            rules: self.rules.into(),
            error_sink: self.error_sink,
        }
    }
}

/// Outcome of one target for one envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetOutcome {
    pub rule: String,
    pub target: String,
    pub state: ItemState,
    /// States the item passed through for this target, oldest first
    pub transitions: Vec<ItemState>,
    pub attempts: u32,
    pub result: Result<Ack, FabricError>,
}

impl TargetOutcome {
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-target results of publishing one envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub outcomes: Vec<TargetOutcome>,
}

impl DispatchReport {
    pub fn matched_rules(&self) -> BTreeSet<&str> {
        self.outcomes.iter().map(|o| o.rule.as_str()).collect()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn outcome(&self, rule: &str, target: &str) -> Option<&TargetOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.rule == rule && o.target == target)
    }
}

/// Routes envelopes to every matching rule and dispatches each target
/// independently.
///
/// The rule set is immutable after `build`, so concurrent publishes share it
/// without locking. A target's failure is reported to the error sink and
/// never affects the other targets of the same envelope.
#[derive(Clone)]
pub struct EventBus {
    rules: Arc<[Rule]>,
    error_sink: Arc<dyn ErrorSink>,
}

impl EventBus {
    pub fn builder(error_sink: Arc<dyn ErrorSink>) -> EventBusBuilder {
        EventBusBuilder::new(error_sink)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[instrument(skip_all, fields(route = %envelope.route(), cmid = envelope.cmid().unwrap_or("")))]
    pub async fn publish(&self, envelope: Envelope) -> DispatchReport {
        let dispatches: Vec<_> = self
            .rules
            .iter()
            .filter(|rule| rule.pattern.matches(&envelope))
            .flat_map(|rule| {
                rule.targets
                    .iter()
                    .map(move |target| (rule.name.as_str(), target))
            })
            .map(|(rule, target)| {
                let span = info_span!("dispatch", rule = %rule, target = %target.name);
                self.dispatch(rule, target, &envelope).instrument(span)
            })
            .collect();

        if dispatches.is_empty() {
            debug!("no rule matched envelope");
            return DispatchReport::default();
        }

        let outcomes = join_all(dispatches).await;
        let report = DispatchReport { outcomes };
        debug!(
            delivered = report.delivered(),
            failed = report.failed(),
            "dispatch complete"
        );
        report
    }

    async fn dispatch(
        &self,
        rule: &str,
        target: &TargetBinding,
        envelope: &Envelope,
    ) -> TargetOutcome {
        // Envelopes reach the bus normalized; the caller matched this rule
        let mut lifecycle = ItemLifecycle::new();
        record_transition(&mut lifecycle, ItemState::Normalized);
        record_transition(&mut lifecycle, ItemState::Routed);
        let mut attempts = 0;

        let result = async {
            let payload = target.template.apply(envelope)?;
            let mut delivery = Delivery::new(payload);

            if let Some(binding) = &target.path {
                delivery = delivery.with_path(binding.resolve(envelope)?);
            }
            if let Some(layer) = &target.ordering {
                delivery = delivery.with_ordering(layer.derive(envelope)?);
                record_transition(&mut lifecycle, ItemState::Grouped);
            }

            let outcome =
                deliver_with_policy(target.sink.as_ref(), &delivery, target.timeout, &target.retry)
                    .await;
            attempts = outcome.attempts;
            outcome.result.map_err(FabricError::from)
        }
        .await;

        let terminal = if result.is_ok() {
            ItemState::Delivered
        } else {
            ItemState::Failed
        };
        record_transition(&mut lifecycle, terminal);
        let state = lifecycle.state();

        match &result {
            Ok(ack) => debug!(ack = ?ack, attempts, "target delivered"),
            Err(err) => {
                warn!(kind = err.kind(), error = %err, attempts, "target failed");
                let report = ErrorReport::new(err, envelope.route())
                    .with_rule(rule)
                    .with_target(target.name.as_str())
                    .with_cmid(envelope.cmid());
                self.error_sink.report(report).await;
            }
        }

        TargetOutcome {
            rule: rule.to_string(),
            target: target.name.clone(),
            state,
            transitions: lifecycle.history().to_vec(),
            attempts,
            result,
        }
    }
}

fn record_transition(lifecycle: &mut ItemLifecycle, next: ItemState) {
    let advanced = lifecycle.advance(next);
    debug_assert!(advanced.is_ok(), "{:?}", advanced);
    if let Err(e) = advanced {
        warn!(error = %e, "item lifecycle transition rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingErrorSink, RecordingSink};
    use crate::transform::{FieldKind, SourceExpr, TransformTemplate};
    use crate::{EventPattern, MockSink, OrderingLayer, PathBinding, RetryPolicy, Sink};
    use chrono::Utc;
    use common::domain::DeliveryError;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn envelope(route: &str, body: Value) -> Envelope {
        Envelope::new(
            route,
            body.as_object().cloned().unwrap(),
            BTreeMap::new(),
            Utc::now(),
        )
    }

    fn cmid_template() -> TransformTemplate {
        TransformTemplate::new("cmid_only")
            .required("cmid", SourceExpr::body("cmid"), FieldKind::String)
    }

    #[test]
    fn test_register_rejects_rule_without_targets() {
        let result = EventBus::builder(Arc::new(RecordingErrorSink::new()))
            .register(Rule::new("imt_mo_rule", EventPattern::route("mo")));
        assert!(matches!(result, Err(FabricError::Configuration(_))));
    }

    #[test]
    fn test_register_rejects_duplicate_rule_names() {
        let sink: Arc<dyn Sink> = Arc::new(RecordingSink::new());
        let rule = || {
            Rule::new("imt_mo_rule", EventPattern::route("mo")).with_target(TargetBinding::new(
                "store",
                Arc::clone(&sink),
                cmid_template(),
            ))
        };
        let result = EventBus::builder(Arc::new(RecordingErrorSink::new()))
            .register(rule())
            .and_then(|b| b.register(rule()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_inclusive_fan_out_to_every_matching_rule() {
        let a = Arc::new(RecordingSink::new());
        let b = Arc::new(RecordingSink::new());
        let c = Arc::new(RecordingSink::new());

        let bus = EventBus::builder(Arc::new(RecordingErrorSink::new()))
            .register(
                Rule::new("by_route", EventPattern::route("mo"))
                    .with_target(TargetBinding::new("a", a.clone(), cmid_template()))
                    .with_target(TargetBinding::new("b", b.clone(), cmid_template())),
            )
            .unwrap()
            .register(
                Rule::new("any", EventPattern::any())
                    .with_target(TargetBinding::new("c", c.clone(), cmid_template())),
            )
            .unwrap()
            .build();

        let report = bus.publish(envelope("mo", json!({"cmid": "ABC123"}))).await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.delivered(), 3);
        assert_eq!(report.matched_rules().len(), 2);
        assert_eq!(a.deliveries().await.len(), 1);
        assert_eq!(b.deliveries().await.len(), 1);
        assert_eq!(c.deliveries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_non_matching_envelope_produces_nothing() {
        let mut sink = MockSink::new();
        sink.expect_deliver().times(0);
        let errors = Arc::new(RecordingErrorSink::new());

        let bus = EventBus::builder(errors.clone())
            .register(
                Rule::new("imt_mo_rule", EventPattern::route("mo"))
                    .with_target(TargetBinding::new("store", Arc::new(sink), cmid_template())),
            )
            .unwrap()
            .build();

        let report = bus.publish(envelope("status", json!({"cmid": "ABC123"}))).await;

        assert!(report.outcomes.is_empty());
        assert!(errors.reports().await.is_empty());
    }

    #[tokio::test]
    async fn test_target_failure_does_not_block_siblings() {
        let mut failing = MockSink::new();
        failing
            .expect_deliver()
            .times(1)
            .returning(|_| Err(DeliveryError::unavailable("iot endpoint down")));
        let healthy = Arc::new(RecordingSink::new());
        let errors = Arc::new(RecordingErrorSink::new());

        let bus = EventBus::builder(errors.clone())
            .register(
                Rule::new("imt_mo_rule", EventPattern::route("mo"))
                    .with_target(TargetBinding::new("device", Arc::new(failing), cmid_template()))
                    .with_target(TargetBinding::new("store", healthy.clone(), cmid_template())),
            )
            .unwrap()
            .build();

        let report = bus.publish(envelope("mo", json!({"cmid": "ABC123"}))).await;

        let device = report.outcome("imt_mo_rule", "device").unwrap();
        assert_eq!(device.state, ItemState::Failed);
        assert_eq!(report.outcome("imt_mo_rule", "store").unwrap().state, ItemState::Delivered);
        assert_eq!(
            device.transitions,
            vec![
                ItemState::Received,
                ItemState::Normalized,
                ItemState::Routed,
                ItemState::Failed,
            ]
        );
        assert_eq!(healthy.deliveries().await.len(), 1);

        let reports = errors.reports().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, "DeliveryError");
        assert_eq!(reports[0].target.as_deref(), Some("device"));
        assert_eq!(reports[0].cmid.as_deref(), Some("ABC123"));
    }

    #[tokio::test]
    async fn test_transform_error_is_reported_and_not_delivered() {
        let mut sink = MockSink::new();
        sink.expect_deliver().times(0);
        let errors = Arc::new(RecordingErrorSink::new());

        let bus = EventBus::builder(errors.clone())
            .register(
                Rule::new("imt_mo_rule", EventPattern::route("mo"))
                    .with_target(TargetBinding::new("store", Arc::new(sink), cmid_template())),
            )
            .unwrap()
            .build();

        let report = bus.publish(envelope("mo", json!({"imei": "x"}))).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(errors.kinds().await, vec!["MissingFieldError".to_string()]);
    }

    #[tokio::test]
    async fn test_ordered_target_gets_keys_and_passes_grouped() {
        let queue = Arc::new(RecordingSink::new());
        let bus = EventBus::builder(Arc::new(RecordingErrorSink::new()))
            .register(
                Rule::new("imt_mt_rule", EventPattern::route("mt-change")).with_target(
                    TargetBinding::new("queue", queue.clone(), cmid_template())
                        .with_ordering(OrderingLayer::new(SourceExpr::body(
                            "message.requestReference",
                        )))
                        .with_path(PathBinding::new().bind("cmid", SourceExpr::body("cmid")))
                        .with_retry(RetryPolicy::exponential(2, Duration::from_millis(1))),
                ),
            )
            .unwrap()
            .build();

        let report = bus
            .publish(envelope(
                "mt-change",
                json!({"cmid": "ABC123", "message": {"requestReference": "rr-1"}}),
            ))
            .await;

        assert_eq!(
            report.outcomes[0].transitions,
            vec![
                ItemState::Received,
                ItemState::Normalized,
                ItemState::Routed,
                ItemState::Grouped,
                ItemState::Delivered,
            ]
        );

        let deliveries = queue.deliveries().await;
        let ordering = deliveries[0].ordering.as_ref().unwrap();
        assert_eq!(ordering.group_key, "rr-1");
        assert_eq!(ordering.dedup_key, "rr-1");
        assert_eq!(deliveries[0].path.as_ref().unwrap()["cmid"], "ABC123");
    }

    #[tokio::test]
    async fn test_missing_group_key_goes_to_error_sink() {
        let mut queue = MockSink::new();
        queue.expect_deliver().times(0);
        let errors = Arc::new(RecordingErrorSink::new());

        let bus = EventBus::builder(errors.clone())
            .register(
                Rule::new("imt_mt_rule", EventPattern::route("mt-change")).with_target(
                    TargetBinding::new("queue", Arc::new(queue), cmid_template()).with_ordering(
                        OrderingLayer::new(SourceExpr::body("message.requestReference")),
                    ),
                ),
            )
            .unwrap()
            .build();

        let report = bus
            .publish(envelope("mt-change", json!({"cmid": "ABC123", "message": {}})))
            .await;

        assert_eq!(report.outcomes[0].state, ItemState::Failed);
        assert_eq!(errors.kinds().await, vec!["MissingGroupKeyError".to_string()]);
    }
}
