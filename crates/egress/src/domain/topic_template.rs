use common::domain::{DeliveryError, FabricError, FabricResult};
use event_bus::PathValues;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A per-device MQTT topic such as `imt/{cmid}/status/{requestReference}`.
///
/// Placeholders are filled from the delivery's path values. A value that
/// would change the topic's shape (`/`, `+`, `#`) is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTemplate {
    segments: Vec<Segment>,
}

impl TopicTemplate {
    pub fn parse(template: &str) -> FabricResult<Self> {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                FabricError::Configuration(format!("unclosed placeholder in topic {}", template))
            })?;
            let name = &after[..close];
            if name.is_empty() || name.contains('{') {
                return Err(FabricError::Configuration(format!(
                    "invalid placeholder in topic {}",
                    template
                )));
            }
            segments.push(Segment::Placeholder(name.to_string()));
            rest = &after[close + 1..];
        }

        if rest.contains('}') {
            return Err(FabricError::Configuration(format!(
                "unbalanced '}}' in topic {}",
                template
            )));
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        if segments.is_empty() {
            return Err(FabricError::Configuration("empty topic template".to_string()));
        }

        Ok(Self { segments })
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn render(&self, values: &PathValues) -> Result<String, DeliveryError> {
        let mut topic = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => topic.push_str(text),
                Segment::Placeholder(name) => {
                    let value = values.get(name).ok_or_else(|| {
                        DeliveryError::Rejected(format!("no value for topic segment {}", name))
                    })?;
                    if value.is_empty() || value.contains(['/', '+', '#']) {
                        return Err(DeliveryError::Rejected(format!(
                            "invalid value {:?} for topic segment {}",
                            value, name
                        )));
                    }
                    topic.push_str(value);
                }
            }
        }
        Ok(topic)
    }
}

impl fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => write!(f, "{}", text)?,
                Segment::Placeholder(name) => write!(f, "{{{}}}", name)?,
            }
        }
        Ok(())
    }
}
