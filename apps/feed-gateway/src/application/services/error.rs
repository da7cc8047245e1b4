//! Gateway Errors
//!
//! Failures of client commands. Everything except `UnknownRouting` is sent
//! back to the requester as a rejection.

use crate::application::ports::ProviderError;
use crate::domain::market::{ProviderName, SpecError};
use crate::domain::subscription::RegistryError;

/// Error raised while applying a client command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The provider adapter could not be created or started.
    #[error("connection to {provider} failed: {reason}")]
    ConnectionFailure {
        /// Provider name.
        provider: ProviderName,
        /// Failure details.
        reason: String,
    },

    /// The command needs a login that does not exist.
    #[error("not logged in to {provider}")]
    NotLoggedIn {
        /// Provider name.
        provider: ProviderName,
    },

    /// A removal named a key that is not registered.
    #[error("no {registry} entry for {key} on {provider}")]
    UnknownRouting {
        /// Provider name.
        provider: ProviderName,
        /// Registry consulted.
        registry: &'static str,
        /// Key that was not found.
        key: String,
    },

    /// The adapter refused a command.
    #[error("{provider} adapter fault: {reason}")]
    AdapterFault {
        /// Provider name.
        provider: ProviderName,
        /// Failure details.
        reason: String,
    },

    /// The command itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// Wrap an adapter error raised while opening the session.
    #[must_use]
    pub fn connection(provider: &str, error: &ProviderError) -> Self {
        Self::ConnectionFailure {
            provider: provider.to_string(),
            reason: error.to_string(),
        }
    }

    /// Wrap an adapter error raised by a session command.
    #[must_use]
    pub fn adapter(provider: &str, error: &ProviderError) -> Self {
        Self::AdapterFault {
            provider: provider.to_string(),
            reason: error.to_string(),
        }
    }

    /// Whether the error is logged and dropped rather than rejected.
    #[must_use]
    pub const fn is_silent(&self) -> bool {
        matches!(self, Self::UnknownRouting { .. })
    }
}

impl From<SpecError> for GatewayError {
    fn from(error: SpecError) -> Self {
        Self::InvalidRequest(error.to_string())
    }
}

impl From<RegistryError> for GatewayError {
    fn from(error: RegistryError) -> Self {
        Self::InvalidRequest(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unknown_routing_is_silent() {
        let unknown = GatewayError::UnknownRouting {
            provider: "P".to_string(),
            registry: "login",
            key: "A1".to_string(),
        };
        assert!(unknown.is_silent());
        assert!(!GatewayError::NotLoggedIn { provider: "P".to_string() }.is_silent());
    }

    #[test]
    fn spec_errors_become_invalid_requests() {
        let error: GatewayError = SpecError::ZeroLength.into();
        assert!(matches!(error, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn adapter_errors_carry_reason() {
        let error = GatewayError::adapter(
            "SIM",
            &ProviderError::SubscriptionRejected {
                symbol: "ZZZZ".to_string(),
                message: "unknown symbol".to_string(),
            },
        );
        assert_eq!(
            error.to_string(),
            "SIM adapter fault: Subscription rejected for ZZZZ: unknown symbol"
        );
    }
}
