use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::domain::FabricError;
use serde::Serialize;
use tracing::error;

/// Pipeline stage where an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Normalize,
    Transform,
    Ordering,
    Delivery,
    Dispatch,
}

impl ErrorStage {
    pub fn of(err: &FabricError) -> Self {
        match err {
            FabricError::MalformedMessage { .. } => Self::Normalize,
            FabricError::MissingField { .. } | FabricError::TypeCoercion { .. } => Self::Transform,
            FabricError::MissingGroupKey(_) => Self::Ordering,
            FabricError::Delivery(_) => Self::Delivery,
            FabricError::Configuration(_) => Self::Dispatch,
        }
    }
}

/// One entry in the error-reporting sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub stage: ErrorStage,
    pub kind: String,
    pub route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(err: &FabricError, route: impl Into<String>) -> Self {
        Self {
            stage: ErrorStage::of(err),
            kind: err.kind().to_string(),
            route: route.into(),
            rule: None,
            target: None,
            cmid: None,
            subject: None,
            message: err.to_string(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_cmid(mut self, cmid: Option<&str>) -> Self {
        self.cmid = cmid.map(str::to_string);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Destination for failed items. Reporting itself never fails the caller.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn report(&self, report: ErrorReport);
}

/// Writes error reports to the log only.
#[derive(Debug, Clone, Default)]
pub struct TracingErrorSink;

#[async_trait]
impl ErrorSink for TracingErrorSink {
    async fn report(&self, report: ErrorReport) {
        error!(
            stage = ?report.stage,
            kind = %report.kind,
            route = %report.route,
            rule = report.rule.as_deref().unwrap_or(""),
            target = report.target.as_deref().unwrap_or(""),
            cmid = report.cmid.as_deref().unwrap_or(""),
            "{}",
            report.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::DeliveryError;
    use serde_json::json;

    #[test]
    fn test_stage_follows_error_kind() {
        assert_eq!(
            ErrorStage::of(&FabricError::malformed("mo", "bad")),
            ErrorStage::Normalize
        );
        assert_eq!(
            ErrorStage::of(&FabricError::MissingGroupKey("x".into())),
            ErrorStage::Ordering
        );
        assert_eq!(
            ErrorStage::of(&DeliveryError::Rejected("x".into()).into()),
            ErrorStage::Delivery
        );
    }

    #[test]
    fn test_report_serializes_without_empty_fields() {
        let report = ErrorReport::new(&FabricError::MissingGroupKey("no ref".into()), "mt-change")
            .with_rule("imt_mt_rule")
            .with_cmid(Some("ABC123"));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["stage"], json!("ordering"));
        assert_eq!(value["kind"], json!("MissingGroupKeyError"));
        assert_eq!(value["rule"], json!("imt_mt_rule"));
        assert_eq!(value["cmid"], json!("ABC123"));
        assert!(value.get("target").is_none());
        assert!(value.get("occurredAt").is_some());
    }

    #[tokio::test]
    async fn test_tracing_error_sink_does_not_fail() {
        TracingErrorSink
            .report(ErrorReport::new(&FabricError::malformed("mo", "not json"), "mo"))
            .await;
    }
}
