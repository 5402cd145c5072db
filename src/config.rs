//! Engine configuration, built from environment variables with defaults.

use std::time::Duration;

use secrecy::SecretString;

/// Two-tier bounce-suppression policy.
///
/// First bounce → temporary suppression for `cooldown`. Once a recipient
/// accumulates `permanent_after` bounces with the latest two falling within
/// `rolling_window` of each other, suppression becomes permanent.
#[derive(Debug, Clone)]
pub struct SuppressionPolicy {
    /// Temporary suppression window applied after a bounce.
    pub cooldown: Duration,
    /// Bounce count at which suppression escalates to permanent.
    pub permanent_after: u32,
    /// Repeat bounces further apart than this do not escalate.
    pub rolling_window: Duration,
}

impl Default for SuppressionPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(24 * 3600),
            permanent_after: 3,
            rolling_window: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Transient-retry bound per task; reaching it marks the task Failed.
    pub max_attempts: u32,
    /// Intra-pass task parallelism bound.
    pub parallelism: usize,
    /// Per-provider send attempt timeout.
    pub send_timeout: Duration,
    /// Content-generation call timeout.
    pub content_timeout: Duration,
    /// Tasks stuck in Processing longer than this are reclaimed.
    pub stale_claim_after: Duration,
    /// Maximum due tasks fetched per pass.
    pub batch_limit: usize,
    /// Bounce-suppression thresholds.
    pub suppression: SuppressionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            parallelism: 4,
            send_timeout: Duration::from_secs(30),
            content_timeout: Duration::from_secs(30),
            stale_claim_after: Duration::from_secs(600), // 10 minutes
            batch_limit: 100,
            suppression: SuppressionPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_parse("OUTREACH_MAX_ATTEMPTS", defaults.max_attempts),
            parallelism: env_parse("OUTREACH_PARALLELISM", defaults.parallelism).max(1),
            send_timeout: env_secs("OUTREACH_SEND_TIMEOUT_SECS", defaults.send_timeout),
            content_timeout: env_secs("OUTREACH_CONTENT_TIMEOUT_SECS", defaults.content_timeout),
            stale_claim_after: env_secs("OUTREACH_STALE_CLAIM_SECS", defaults.stale_claim_after),
            batch_limit: env_parse("OUTREACH_BATCH_LIMIT", defaults.batch_limit),
            suppression: SuppressionPolicy {
                cooldown: env_secs(
                    "OUTREACH_BOUNCE_COOLDOWN_SECS",
                    defaults.suppression.cooldown,
                ),
                permanent_after: env_parse(
                    "OUTREACH_BOUNCE_PERMANENT_AFTER",
                    defaults.suppression.permanent_after,
                ),
                rolling_window: env_secs(
                    "OUTREACH_BOUNCE_WINDOW_SECS",
                    defaults.suppression.rolling_window,
                ),
            },
        }
    }
}

/// SMTP provider configuration.
#[derive(Debug, Clone)]
pub struct SmtpProviderConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpProviderConfig {
    /// Build config from environment variables.
    /// Returns `None` if `OUTREACH_SMTP_HOST` is not set (provider disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OUTREACH_SMTP_HOST").ok()?;
        let port: u16 = std::env::var("OUTREACH_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);
        let username = std::env::var("OUTREACH_SMTP_USERNAME").unwrap_or_default();
        let password =
            SecretString::from(std::env::var("OUTREACH_SMTP_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("OUTREACH_SMTP_FROM").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

/// HTTP send-API provider configuration.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub endpoint: String,
    pub api_key: SecretString,
    pub from_address: String,
}

impl HttpProviderConfig {
    /// Build config from environment variables.
    /// Returns `None` if `OUTREACH_API_URL` is not set (provider disabled).
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("OUTREACH_API_URL").ok()?;
        let api_key = SecretString::from(std::env::var("OUTREACH_API_KEY").unwrap_or_default());
        let from_address = std::env::var("OUTREACH_API_FROM").unwrap_or_default();

        Some(Self {
            endpoint,
            api_key,
            from_address,
        })
    }
}

/// Content-service client configuration.
#[derive(Debug, Clone)]
pub struct ContentServiceConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
}

impl ContentServiceConfig {
    /// Build config from environment variables.
    /// Returns `None` if `OUTREACH_CONTENT_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("OUTREACH_CONTENT_URL").ok()?;
        let api_key = std::env::var("OUTREACH_CONTENT_KEY").ok().map(SecretString::from);
        Some(Self { endpoint, api_key })
    }
}

/// Ordered provider list from `OUTREACH_PROVIDER_ORDER` (comma-separated,
/// e.g. `smtp,http`). Defaults to `smtp,http` when unset.
#[must_use]
pub fn provider_order() -> Vec<String> {
    std::env::var("OUTREACH_PROVIDER_ORDER")
        .unwrap_or_else(|_| "smtp,http".to_string())
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map_or(default, Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.parallelism, 4);
        assert_eq!(cfg.batch_limit, 100);
        assert_eq!(cfg.send_timeout, Duration::from_secs(30));
        assert_eq!(cfg.stale_claim_after, Duration::from_secs(600));
    }

    #[test]
    fn suppression_defaults() {
        let policy = SuppressionPolicy::default();
        assert_eq!(policy.cooldown, Duration::from_secs(86400));
        assert_eq!(policy.permanent_after, 3);
        assert_eq!(policy.rolling_window, Duration::from_secs(604_800));
    }
}
