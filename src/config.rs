//! Service configuration
//!
//! Every knob has a default matching production behaviour and can be overridden
//! through `CLIPPER_WEBHOOKS_*` environment variables. Secrets are read from the
//! environment only and never logged.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::backoff::{BackoffPolicy, MAX_BACKOFF_DELAY};
use crate::error::{Error, Result};

const ENV_PREFIX: &str = "CLIPPER_WEBHOOKS_";

/// Runtime configuration for ingestion, delivery and the retry scheduler
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Delay before the first retry; doubles with each further failure
    pub base_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
    /// Retry budget for inbound events
    pub max_retries: u32,
    /// Retry budget for outbound deliveries
    pub outbound_max_retries: u32,
    /// How often the scheduler scans for due items
    pub scan_interval: Duration,
    /// Upper bound on items claimed per tick
    pub batch_size: usize,
    /// Concurrent attempts within one batch
    pub workers: usize,
    /// How long a claim stays valid before another scheduler may take the item
    pub claim_lease: Duration,
    /// Per-request timeout for outbound deliveries
    pub delivery_timeout: Duration,
    /// Timeout for the inbound business handler
    pub processing_timeout: Duration,
    /// Accepted age of an inbound signature timestamp
    pub signature_tolerance: Duration,
    /// Treat 4xx (other than 429) as retriable
    pub retry_client_errors: bool,
    /// Permit delivery to loopback/private literal IPs
    pub allow_private_targets: bool,
    /// Inbound Stripe signing secrets (`whsec_...`); any one may match, so a
    /// rotated secret keeps working until it is removed
    pub stripe_signing_secrets: Vec<String>,
    /// Bearer token for the admin routes; admin surface is off when unset
    pub admin_token: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            max_retries: 3,
            outbound_max_retries: 5,
            scan_interval: Duration::from_secs(60),
            batch_size: 100,
            workers: 8,
            claim_lease: Duration::from_secs(300),
            delivery_timeout: Duration::from_secs(10),
            processing_timeout: Duration::from_secs(30),
            signature_tolerance: Duration::from_secs(300),
            retry_client_errors: true,
            allow_private_targets: false,
            stripe_signing_secrets: Vec::new(),
            admin_token: None,
        }
    }
}

impl WebhookConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when a variable is present but unparsable, or
    /// when the resulting configuration fails [`WebhookConfig::validate`].
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            base_delay: env_secs("BASE_DELAY_SECS", defaults.base_delay)?,
            max_delay: env_secs("MAX_DELAY_SECS", defaults.max_delay)?,
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries)?,
            outbound_max_retries: env_parse(
                "OUTBOUND_MAX_RETRIES",
                defaults.outbound_max_retries,
            )?,
            scan_interval: env_secs("SCAN_INTERVAL_SECS", defaults.scan_interval)?,
            batch_size: env_parse("BATCH_SIZE", defaults.batch_size)?,
            workers: env_parse("WORKERS", defaults.workers)?,
            claim_lease: env_secs("CLAIM_LEASE_SECS", defaults.claim_lease)?,
            delivery_timeout: env_secs("DELIVERY_TIMEOUT_SECS", defaults.delivery_timeout)?,
            processing_timeout: env_secs(
                "PROCESSING_TIMEOUT_SECS",
                defaults.processing_timeout,
            )?,
            signature_tolerance: env_secs(
                "SIGNATURE_TOLERANCE_SECS",
                defaults.signature_tolerance,
            )?,
            retry_client_errors: env_parse("RETRY_CLIENT_ERRORS", defaults.retry_client_errors)?,
            allow_private_targets: env_parse(
                "ALLOW_PRIVATE_TARGETS",
                defaults.allow_private_targets,
            )?,
            stripe_signing_secrets: split_secrets(env::var("STRIPE_WEBHOOK_SECRET").ok()),
            admin_token: non_empty(env::var(format!("{ENV_PREFIX}ADMIN_TOKEN")).ok()),
        };

        if config.stripe_signing_secrets.is_empty() {
            warn!("STRIPE_WEBHOOK_SECRET not set; inbound webhooks will be rejected");
        }
        if let Some(token) = &config.admin_token {
            if token.len() < 32 {
                warn!("SECURITY WARNING: admin token is less than 32 characters");
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Configuration for tests: millisecond delays, private targets allowed
    pub fn test_config() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            scan_interval: Duration::from_millis(20),
            claim_lease: Duration::from_secs(5),
            delivery_timeout: Duration::from_secs(2),
            processing_timeout: Duration::from_secs(2),
            allow_private_targets: true,
            stripe_signing_secrets: vec!["whsec_test_secret".to_string()],
            admin_token: Some("test-admin-token-for-unit-tests-only".to_string()),
            ..Self::default()
        }
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.base_delay.is_zero() {
            return Err(Error::Config("base_delay must be positive".to_string()));
        }
        if self.max_delay < self.base_delay {
            return Err(Error::Config(
                "max_delay must not be smaller than base_delay".to_string(),
            ));
        }
        if self.max_delay > MAX_BACKOFF_DELAY {
            return Err(Error::Config(format!(
                "max_delay must not exceed {}s",
                MAX_BACKOFF_DELAY.as_secs()
            )));
        }
        if self.max_retries == 0 || self.outbound_max_retries == 0 {
            return Err(Error::Config("retry budgets must be at least 1".to_string()));
        }
        if self.batch_size == 0 || self.workers == 0 {
            return Err(Error::Config(
                "batch_size and workers must be at least 1".to_string(),
            ));
        }
        // Leases are renewed before each attempt, so one attempt must fit
        let longest_attempt = self.processing_timeout.max(self.delivery_timeout);
        if self.claim_lease <= longest_attempt {
            return Err(Error::Config(format!(
                "claim_lease ({}ms) must exceed the longest attempt timeout ({}ms)",
                self.claim_lease.as_millis(),
                longest_attempt.as_millis()
            )));
        }
        Ok(())
    }

    /// Backoff policy derived from the delay settings
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay, self.max_delay)
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let name = format!("{ENV_PREFIX}{key}");
    match env::var(&name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .to_lowercase()
            .parse::<T>()
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
        _ => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Comma-separated secret list, blanks dropped
fn split_secrets(value: Option<String>) -> Vec<String> {
    value
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
