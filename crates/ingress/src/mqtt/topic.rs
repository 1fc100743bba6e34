use common::domain::{routes, FabricError, FabricResult};

/// Subscription filter for MT sends published by devices.
pub fn mt_subscription(prefix: &str) -> String {
    format!("{}/+/mt", prefix)
}

/// Extracts the cmid from an MT topic `{prefix}/{cmid}/mt`.
///
/// The prefix may itself contain `/`.
pub fn parse_mt_topic<'a>(prefix: &str, topic: &'a str) -> FabricResult<&'a str> {
    let rest = topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| {
            FabricError::malformed(
                routes::MT_CHANGE,
                format!("topic '{}' is outside prefix '{}'", topic, prefix),
            )
        })?;

    match rest.split('/').collect::<Vec<_>>().as_slice() {
        [cmid, "mt"] if !cmid.trim().is_empty() => Ok(*cmid),
        _ => Err(FabricError::malformed(
            routes::MT_CHANGE,
            format!("invalid MT topic '{}': expected '{}/{{cmid}}/mt'", topic, prefix),
        )),
    }
}
