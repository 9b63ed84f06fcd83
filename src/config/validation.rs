use crate::config::types::{
    EngineConfig, EvasionConfig, IdentityConfig, IdentityEntry, NormalizeConfig, RateLimitConfig,
    RetryConfig, SchedulerConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire engine configuration
pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    validate_scheduler(&config.scheduler)?;
    validate_rate_limit(&config.rate_limit)?;
    validate_retry(&config.retry)?;
    validate_evasion(&config.evasion)?;
    validate_identity(&config.identity)?;
    validate_identities(&config.identities)?;
    validate_normalize(&config.normalize)?;
    Ok(())
}

fn validate_scheduler(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.max_workers < 1 || config.max_workers > 256 {
        return Err(ConfigError::Validation(format!(
            "max_workers must be between 1 and 256, got {}",
            config.max_workers
        )));
    }

    if config.per_platform_concurrency < 1 || config.per_platform_concurrency > config.max_workers {
        return Err(ConfigError::Validation(format!(
            "per_platform_concurrency must be between 1 and max_workers ({}), got {}",
            config.max_workers, config.per_platform_concurrency
        )));
    }

    Ok(())
}

fn validate_rate_limit(config: &RateLimitConfig) -> Result<(), ConfigError> {
    for (capacity, refill) in std::iter::once((config.capacity, config.refill_per_sec)).chain(
        config
            .overrides
            .iter()
            .map(|o| (o.capacity, o.refill_per_sec)),
    ) {
        if capacity < 1.0 {
            return Err(ConfigError::Validation(format!(
                "rate-limit capacity must be >= 1, got {}",
                capacity
            )));
        }
        if refill <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "rate-limit refill-per-sec must be > 0, got {}",
                refill
            )));
        }
    }

    Ok(())
}

fn validate_retry(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.blocked_max_attempts < 1 || config.blocked_max_attempts > config.max_attempts {
        return Err(ConfigError::Validation(format!(
            "blocked_max_attempts must be between 1 and max_attempts ({}), got {}",
            config.max_attempts, config.blocked_max_attempts
        )));
    }

    if config.base_backoff_ms < 1 {
        return Err(ConfigError::Validation(
            "base_backoff_ms must be >= 1".to_string(),
        ));
    }

    if config.rate_limited_backoff_ms < config.base_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "rate_limited_backoff_ms must be >= base_backoff_ms ({}ms), got {}ms",
            config.base_backoff_ms, config.rate_limited_backoff_ms
        )));
    }

    if config.max_backoff_ms < config.rate_limited_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "max_backoff_ms must be >= rate_limited_backoff_ms ({}ms), got {}ms",
            config.rate_limited_backoff_ms, config.max_backoff_ms
        )));
    }

    if !(0.0..=1.0).contains(&config.jitter_ratio) {
        return Err(ConfigError::Validation(format!(
            "jitter_ratio must be within [0, 1], got {}",
            config.jitter_ratio
        )));
    }

    Ok(())
}

fn validate_evasion(config: &EvasionConfig) -> Result<(), ConfigError> {
    if config.attempt_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "attempt_timeout_ms must be >= 100ms, got {}ms",
            config.attempt_timeout_ms
        )));
    }

    Ok(())
}

fn validate_identity(config: &IdentityConfig) -> Result<(), ConfigError> {
    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    if config.cooldown_base_secs < 1 {
        return Err(ConfigError::Validation(
            "cooldown_base_secs must be >= 1".to_string(),
        ));
    }

    if config.cooldown_cap_secs < config.cooldown_base_secs {
        return Err(ConfigError::Validation(format!(
            "cooldown_cap_secs must be >= cooldown_base_secs ({}s), got {}s",
            config.cooldown_base_secs, config.cooldown_cap_secs
        )));
    }

    Ok(())
}

fn validate_identities(identities: &[IdentityEntry]) -> Result<(), ConfigError> {
    if identities.is_empty() {
        return Err(ConfigError::Validation(
            "at least one identity must be configured".to_string(),
        ));
    }

    for entry in identities {
        if entry.user_agent.is_empty() {
            return Err(ConfigError::Validation(
                "identity user-agent cannot be empty".to_string(),
            ));
        }

        if let Some(proxy) = &entry.proxy {
            Url::parse(proxy)
                .map_err(|e| ConfigError::InvalidProxy(format!("{}: {}", proxy, e)))?;
        }

        if let Some(platforms) = &entry.platforms {
            if platforms.is_empty() {
                return Err(ConfigError::Validation(
                    "identity platform list cannot be empty; omit it to allow all platforms"
                        .to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_normalize(config: &NormalizeConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.match_confidence_threshold) {
        return Err(ConfigError::Validation(format!(
            "match_confidence_threshold must be within [0, 1], got {}",
            config.match_confidence_threshold
        )));
    }

    if config.price_outlier_multiple <= 1.0 {
        return Err(ConfigError::Validation(format!(
            "price_outlier_multiple must be > 1, got {}",
            config.price_outlier_multiple
        )));
    }

    Ok(())
}
