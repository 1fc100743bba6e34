use std::time::Duration;
use thiserror::Error;

pub type FabricResult<T> = Result<T, FabricError>;

/// Error kinds surfaced across component boundaries.
///
/// Every component converts its internal faults into one of these before
/// returning; nothing crosses a boundary as a bare `anyhow::Error`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FabricError {
    #[error("malformed message on route {route}: {reason}")]
    MalformedMessage { route: String, reason: String },

    #[error("missing required field {field} (from {expression})")]
    MissingField { field: String, expression: String },

    #[error("cannot coerce field {field} to {expected}: got {found}")]
    TypeCoercion {
        field: String,
        expected: String,
        found: String,
    },

    #[error("missing group key: {0}")]
    MissingGroupKey(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl FabricError {
    /// Stable name of the error kind, used in error reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedMessage { .. } => "MalformedMessageError",
            Self::MissingField { .. } => "MissingFieldError",
            Self::TypeCoercion { .. } => "TypeCoercionError",
            Self::MissingGroupKey(_) => "MissingGroupKeyError",
            Self::Delivery(_) => "DeliveryError",
            Self::Configuration(_) => "ConfigurationError",
        }
    }

    pub fn malformed(route: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            route: route.into(),
            reason: reason.into(),
        }
    }
}

/// Sink-level failure for a single delivery attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("delivery rejected: {0}")]
    Rejected(String),

    #[error("destination unavailable: {0}")]
    Unavailable(String),
}

impl DeliveryError {
    /// Rejections are permanent; timeouts and unavailability may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            FabricError::malformed("mo", "no cmid").kind(),
            "MalformedMessageError"
        );
        assert_eq!(
            FabricError::MissingGroupKey("rr".to_string()).kind(),
            "MissingGroupKeyError"
        );
        let delivery: FabricError = DeliveryError::Rejected("bad key".to_string()).into();
        assert_eq!(delivery.kind(), "DeliveryError");
    }

    #[test]
    fn test_retryable_delivery_errors() {
        assert!(DeliveryError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(DeliveryError::unavailable("connection refused").is_retryable());
        assert!(!DeliveryError::Rejected("invalid".to_string()).is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = FabricError::TypeCoercion {
            field: "messageId".to_string(),
            expected: "number".to_string(),
            found: "\"abc\"".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot coerce field messageId to number: got \"abc\""
        );
    }
}
