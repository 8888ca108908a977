//! Error types for gateway operations

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Duplicate cache policy for resource class {class}")]
    DuplicatePolicy { class: String },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to read configuration file {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Errors surfaced by the gateway to page controllers.
///
/// A stale-served read is not an error: it is a successful read tagged
/// `ServedFrom::Stale` that carries the error which caused the degradation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Unknown resource class: {class}")]
    UnknownResourceClass { class: String },

    #[error("Upstream timed out for {class}/{key}")]
    UpstreamTimeout { class: String, key: String },

    #[error("Upstream unreachable for {class}: {reason}")]
    UpstreamConnectionFailure { class: String, reason: String },

    #[error("Upstream rejected request for {class} with status {code}: {message}")]
    UpstreamClientError {
        class: String,
        code: u16,
        message: String,
    },

    #[error("Upstream failed for {class} with status {code}: {message}")]
    UpstreamServerError {
        class: String,
        code: u16,
        message: String,
    },

    #[error("Invalid payload for {class}: {reason}")]
    InvalidPayload { class: String, reason: String },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Telemetry error: {reason}")]
    Telemetry { reason: String },
}

impl GatewayError {
    /// Whether this failure may be masked by a stale cache entry.
    ///
    /// Only unhealthy-upstream failures qualify. A client error means the
    /// request itself was wrong and must reach the caller unchanged.
    pub fn is_stale_eligible(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamTimeout { .. }
                | GatewayError::UpstreamConnectionFailure { .. }
                | GatewayError::UpstreamServerError { .. }
        )
    }

    /// HTTP status a controller should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::UpstreamClientError { code, .. } => *code,
            GatewayError::UpstreamTimeout { .. } => 504,
            GatewayError::UpstreamConnectionFailure { .. } => 503,
            GatewayError::UpstreamServerError { .. } => 502,
            GatewayError::UnknownResourceClass { .. }
            | GatewayError::InvalidPayload { .. }
            | GatewayError::Config(_)
            | GatewayError::Telemetry { .. } => 500,
        }
    }

    /// Short message suitable for a page banner.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::UpstreamClientError { message, .. } if !message.is_empty() => {
                message.clone()
            }
            GatewayError::UpstreamClientError { .. } => {
                "request rejected by the trading system".to_string()
            }
            GatewayError::UpstreamTimeout { .. } => {
                "trading system did not respond in time".to_string()
            }
            GatewayError::UpstreamConnectionFailure { .. } => {
                "service temporarily unavailable".to_string()
            }
            GatewayError::UpstreamServerError { .. } => {
                "trading system reported an internal error".to_string()
            }
            GatewayError::UnknownResourceClass { .. }
            | GatewayError::InvalidPayload { .. }
            | GatewayError::Config(_)
            | GatewayError::Telemetry { .. } => "internal gateway error".to_string(),
        }
    }
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> GatewayError {
        GatewayError::UpstreamTimeout {
            class: "accounts".to_string(),
            key: "accounts:list".to_string(),
        }
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "upstream_base_url".to_string(),
            value: "ftp://x".to_string(),
            reason: "must be http or https".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("upstream_base_url"));
        assert!(msg.contains("ftp://x"));
        assert!(msg.contains("must be http or https"));
    }

    #[test]
    fn test_gateway_error_display_timeout() {
        let msg = format!("{}", timeout());
        assert!(msg.contains("timed out"));
        assert!(msg.contains("accounts/accounts:list"));
    }

    #[test]
    fn test_gateway_error_display_client_error() {
        let err = GatewayError::UpstreamClientError {
            class: "instruments".to_string(),
            code: 404,
            message: "Instrument not found".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("404"));
        assert!(msg.contains("Instrument not found"));
    }

    #[test]
    fn test_stale_eligibility() {
        assert!(timeout().is_stale_eligible());
        assert!(GatewayError::UpstreamConnectionFailure {
            class: "accounts".to_string(),
            reason: "refused".to_string(),
        }
        .is_stale_eligible());
        assert!(GatewayError::UpstreamServerError {
            class: "accounts".to_string(),
            code: 503,
            message: String::new(),
        }
        .is_stale_eligible());

        assert!(!GatewayError::UpstreamClientError {
            class: "accounts".to_string(),
            code: 400,
            message: String::new(),
        }
        .is_stale_eligible());
        assert!(!GatewayError::UnknownResourceClass {
            class: "nope".to_string(),
        }
        .is_stale_eligible());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(timeout().status_code(), 504);
        assert_eq!(
            GatewayError::UpstreamClientError {
                class: "accounts".to_string(),
                code: 409,
                message: String::new(),
            }
            .status_code(),
            409
        );
        assert_eq!(
            GatewayError::UnknownResourceClass {
                class: "nope".to_string()
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn test_user_message_prefers_upstream_message() {
        let err = GatewayError::UpstreamClientError {
            class: "accounts".to_string(),
            code: 400,
            message: "accountId is required".to_string(),
        };
        assert_eq!(err.user_message(), "accountId is required");

        let err = GatewayError::UpstreamConnectionFailure {
            class: "accounts".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(err.user_message(), "service temporarily unavailable");
    }

    #[test]
    fn test_gateway_error_from_config() {
        let err = GatewayError::from(ConfigError::MissingRequired {
            field: "per_resource_ttl_ms.watchlists".to_string(),
        });
        assert!(matches!(err, GatewayError::Config(_)));
        assert_eq!(err.status_code(), 500);
    }
}
