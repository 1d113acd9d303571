use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("`incremental_interval_mins` cannot be zero")]
    IncrementalIntervalZero,
    #[error("`incremental_interval_mins` cannot exceed {max}, got {value}")]
    IncrementalIntervalTooLarge { value: u64, max: u64 },
    #[error("`utc_offset_secs` must be strictly between -86400 and 86400, got {0}")]
    InvalidUtcOffset(i32),
    #[error("`max_attempts` cannot be zero")]
    RetryMaxAttemptsZero,
    #[error("`initial_backoff_ms` ({initial}) cannot exceed `max_backoff_ms` ({max})")]
    RetryBackoffOrder { initial: u64, max: u64 },
    #[error("`max_concurrent_entities` cannot be zero")]
    MaxConcurrentEntitiesZero,
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    #[error("Invalid BigQuery config: `{0}` cannot be empty")]
    EmptyBigQueryField(&'static str),
    #[error("Invalid alert config: `webhook_url` must be an http(s) URL, got `{0}`")]
    InvalidWebhookUrl(String),
}
