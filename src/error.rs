//! Error types for the outreach delivery engine.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Content generation error: {0}")]
    Content(#[from] ContentError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Content-generation errors.
///
/// The content service is an external dependency; any of these fails the
/// task for the current cycle without contacting a send provider.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Content request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Content service rejected the request: {reason}")]
    Rejected { reason: String },

    #[error("Invalid response from content service: {reason}")]
    InvalidResponse { reason: String },

    #[error("Content generation timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// A single provider attempt's failure, classified.
///
/// - `RecipientRejected` is intrinsic to the recipient (hard bounce) —
///   no other provider can fix an invalid mailbox.
/// - `ProviderRejected` is permanent but provider-specific (auth failure,
///   config rejection) — the next provider may still succeed.
/// - `Transient` and `Timeout` may succeed on a later attempt.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Recipient rejected by {provider}: {reason}")]
    RecipientRejected { provider: String, reason: String },

    #[error("Provider {provider} rejected the message: {reason}")]
    ProviderRejected { provider: String, reason: String },

    #[error("Transient failure on {provider}: {reason}")]
    Transient { provider: String, reason: String },

    #[error("Send via {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

impl SendError {
    /// True if the recipient address itself is the problem (hard bounce).
    #[must_use]
    pub const fn is_hard_bounce(&self) -> bool {
        matches!(self, Self::RecipientRejected { .. })
    }

    /// True if a later attempt (or another provider) may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// Name of the provider that produced this error.
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::RecipientRejected { provider, .. }
            | Self::ProviderRejected { provider, .. }
            | Self::Transient { provider, .. }
            | Self::Timeout { provider, .. } => provider,
        }
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
