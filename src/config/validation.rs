//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges. Every violation is
//! reported, not just the first.

use thiserror::Error;
use url::Url;
use crate::config::schema::OrchestratorConfig;

/// A single semantic violation in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be at least {min}, got {actual}")]
    BelowMinimum {
        field: &'static str,
        min: u64,
        actual: u64,
    },

    #[error("remote.base_url '{0}' is not a valid URL")]
    InvalidUrl(String),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),
}

fn at_least(errors: &mut Vec<ValidationError>, field: &'static str, min: u64, actual: u64) {
    if actual < min {
        errors.push(ValidationError::BelowMinimum { field, min, actual });
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &OrchestratorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    at_least(&mut errors, "concurrency.max_concurrency", 1, config.concurrency.max_concurrency as u64);
    at_least(&mut errors, "concurrency.requests_per_item", 1, config.concurrency.requests_per_item as u64);
    at_least(&mut errors, "circuit_breaker.failure_threshold", 1, config.circuit_breaker.failure_threshold as u64);
    at_least(&mut errors, "pool.size", 1, config.pool.size as u64);
    at_least(&mut errors, "pool.acquire_timeout_ms", 1, config.pool.acquire_timeout_ms);
    at_least(
        &mut errors,
        "pool.reset_after_transport_failures",
        1,
        config.pool.reset_after_transport_failures as u64,
    );
    at_least(&mut errors, "locks.timeout_ms", 1, config.locks.timeout_ms);
    at_least(&mut errors, "remote.request_timeout_ms", 1, config.remote.request_timeout_ms);

    if Url::parse(&config.remote.base_url).is_err() {
        errors.push(ValidationError::InvalidUrl(config.remote.base_url.clone()));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&OrchestratorConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_all_violations() {
        let mut config = OrchestratorConfig::default();
        config.concurrency.max_concurrency = 0;
        config.circuit_breaker.failure_threshold = 0;
        config.pool.size = 0;
        config.remote.base_url = "not a url".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::BelowMinimum {
            field: "pool.size",
            min: 1,
            actual: 0,
        }));
        assert!(errors.contains(&ValidationError::InvalidUrl("not a url".into())));
    }

    #[test]
    fn test_zero_retries_and_cooldown_are_allowed() {
        let mut config = OrchestratorConfig::default();
        config.retries.max_attempts = 0;
        config.retries.backoff_ms = 0;
        config.circuit_breaker.cooldown_ms = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = OrchestratorConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::InvalidMetricsAddress("nowhere".into())]);
    }
}
