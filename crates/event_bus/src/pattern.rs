use crate::transform::scalar_text;
use common::domain::Envelope;
use std::collections::BTreeMap;

/// Match predicate for a rule.
///
/// A pattern is a conjunction: the route must be one of `routes` (any route
/// when empty), every listed attribute must hold one of its allowed values,
/// and every listed body path must hold one of its allowed scalar values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPattern {
    routes: Vec<String>,
    attributes: BTreeMap<String, Vec<String>>,
    body: BTreeMap<String, Vec<String>>,
}

impl EventPattern {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn route(route: impl Into<String>) -> Self {
        Self {
            routes: vec![route.into()],
            ..Default::default()
        }
    }

    pub fn or_route(mut self, route: impl Into<String>) -> Self {
        self.routes.push(route.into());
        self
    }

    pub fn with_attribute<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.attributes
            .entry(name.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_body_field<I, V>(mut self, path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.body
            .entry(path.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        if !self.routes.is_empty() && !self.routes.iter().any(|r| r == envelope.route()) {
            return false;
        }

        let attributes_match = self.attributes.iter().all(|(name, allowed)| {
            envelope
                .attribute(name)
                .is_some_and(|value| allowed.iter().any(|a| a == value))
        });
        if !attributes_match {
            return false;
        }

        self.body.iter().all(|(path, allowed)| {
            envelope
                .body_value(path)
                .and_then(scalar_text)
                .is_some_and(|value| allowed.iter().any(|a| *a == value))
        })
    }
}
