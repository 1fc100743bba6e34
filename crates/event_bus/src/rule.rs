use crate::transform::{scalar_text, SourceExpr, TransformTemplate};
use crate::{EventPattern, OrderingLayer, PathValues, RetryPolicy, Sink};
use common::domain::{Envelope, FabricError, FabricResult};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TARGET_TIMEOUT: Duration = Duration::from_secs(10);

/// Named destination segments, each resolved from the envelope per delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathBinding {
    segments: Vec<(String, SourceExpr)>,
}

impl PathBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, source: SourceExpr) -> Self {
        self.segments.push((name.into(), source));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|(name, _)| name.as_str())
    }

    /// Every segment is required; an absent one fails the delivery attempt.
    pub fn resolve(&self, envelope: &Envelope) -> FabricResult<PathValues> {
        self.segments
            .iter()
            .map(|(name, source)| {
                source
                    .evaluate(envelope)
                    .as_ref()
                    .and_then(scalar_text)
                    .map(|value| (name.clone(), value))
                    .ok_or_else(|| FabricError::MissingField {
                        field: name.clone(),
                        expression: source.to_string(),
                    })
            })
            .collect()
    }
}

/// One target of a rule: a sink plus how to shape and address what it receives.
#[derive(Clone)]
pub struct TargetBinding {
    pub(crate) name: String,
    pub(crate) sink: Arc<dyn Sink>,
    pub(crate) template: TransformTemplate,
    pub(crate) path: Option<PathBinding>,
    pub(crate) ordering: Option<OrderingLayer>,
    pub(crate) timeout: Duration,
    pub(crate) retry: RetryPolicy,
}

impl TargetBinding {
    pub fn new(name: impl Into<String>, sink: Arc<dyn Sink>, template: TransformTemplate) -> Self {
        Self {
            name: name.into(),
            sink,
            template,
            path: None,
            ordering: None,
            timeout: DEFAULT_TARGET_TIMEOUT,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_path(mut self, path: PathBinding) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_ordering(mut self, ordering: OrderingLayer) -> Self {
        self.ordering = Some(ordering);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &TransformTemplate {
        &self.template
    }
}

impl fmt::Debug for TargetBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetBinding")
            .field("name", &self.name)
            .field("template", &self.template.name())
            .field("path", &self.path)
            .field("ordering", &self.ordering)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// A routing rule: a pattern and the targets every matching envelope fans out to.
#[derive(Debug, Clone)]
pub struct Rule {
    pub(crate) name: String,
    pub(crate) pattern: EventPattern,
    pub(crate) targets: Vec<TargetBinding>,
}

impl Rule {
    pub fn new(name: impl Into<String>, pattern: EventPattern) -> Self {
        Self {
            name: name.into(),
            pattern,
            targets: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: TargetBinding) -> Self {
        self.targets.push(target);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &EventPattern {
        &self.pattern
    }

    pub fn targets(&self) -> &[TargetBinding] {
        &self.targets
    }

    pub(crate) fn validate(&self) -> FabricResult<()> {
        if self.targets.is_empty() {
            return Err(FabricError::Configuration(format!(
                "rule {} has no targets",
                self.name
            )));
        }

        let mut names = BTreeSet::new();
        for target in &self.targets {
            if !names.insert(target.name.as_str()) {
                return Err(FabricError::Configuration(format!(
                    "rule {} has two targets named {}",
                    self.name, target.name
                )));
            }
            if target.timeout.is_zero() {
                return Err(FabricError::Configuration(format!(
                    "target {} of rule {} has a zero timeout",
                    target.name, self.name
                )));
            }
            target.template.validate()?;
        }

        Ok(())
    }
}
