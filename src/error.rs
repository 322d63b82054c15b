//! Error types for the repocast service.
//!
//! Every failure that crosses a component boundary is one of these variants.
//! Each variant carries a stable snake_case error code that is part of the
//! public API contract and will not change; handlers map codes to HTTP
//! status codes via [`Error::http_status()`].

/// Errors produced by the repocast pipelines.
///
/// The Display impl formats as `[code] message`. Use [`Error::code()`] for
/// programmatic handling rather than parsing Display output.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed URL, unsupported host, or out-of-range parameters.
    #[error("[invalid_input] {0}")]
    InvalidInput(String),

    /// The repository host reports the repository does not exist.
    /// Also used for missing cache keys on artifact lookups.
    #[error("[upstream_not_found] {0}")]
    UpstreamNotFound(String),

    /// The repository host rejected our credentials (private repo, bad token).
    #[error("[upstream_unauthorized] {0}")]
    UpstreamUnauthorized(String),

    /// The repository host rate limit was exhausted after retries.
    #[error("[upstream_rate_limited] {0}")]
    UpstreamRateLimited(String),

    /// Network-level failure talking to the repository host.
    #[error("[upstream_network] {0}")]
    UpstreamNetwork(String),

    /// An LLM/STT/TTS provider rate limit was exhausted after retries.
    #[error("[provider_rate_limited] {0}")]
    ProviderRateLimited(String),

    /// An LLM/STT/TTS provider call timed out after retries.
    #[error("[provider_timeout] {0}")]
    ProviderTimeout(String),

    /// The provider refused the request on content grounds. Never retried.
    #[error("[provider_content_filtered] {0}")]
    ProviderContentFiltered(String),

    /// Any other provider-side failure.
    #[error("[provider_other] {0}")]
    ProviderOther(String),

    /// LLM output failed post-processing after the one allowed repair pass.
    #[error("[validation_failed] {0}")]
    ValidationFailed(String),

    /// Audio concatenation or encoding failed.
    #[error("[assembly_failed] {0}")]
    AssemblyFailed(String),

    /// The persistence layer failed to read or write an artifact.
    #[error("[storage_failed] {0}")]
    StorageFailed(String),

    /// Unexpected internal failure.
    #[error("[internal] {0}")]
    Internal(String),
}

impl Error {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::UpstreamNotFound(_) => "upstream_not_found",
            Self::UpstreamUnauthorized(_) => "upstream_unauthorized",
            Self::UpstreamRateLimited(_) => "upstream_rate_limited",
            Self::UpstreamNetwork(_) => "upstream_network",
            Self::ProviderRateLimited(_) => "provider_rate_limited",
            Self::ProviderTimeout(_) => "provider_timeout",
            Self::ProviderContentFiltered(_) => "provider_content_filtered",
            Self::ProviderOther(_) => "provider_other",
            Self::ValidationFailed(_) => "validation_failed",
            Self::AssemblyFailed(_) => "assembly_failed",
            Self::StorageFailed(_) => "storage_failed",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput(m)
            | Self::UpstreamNotFound(m)
            | Self::UpstreamUnauthorized(m)
            | Self::UpstreamRateLimited(m)
            | Self::UpstreamNetwork(m)
            | Self::ProviderRateLimited(m)
            | Self::ProviderTimeout(m)
            | Self::ProviderContentFiltered(m)
            | Self::ProviderOther(m)
            | Self::ValidationFailed(m)
            | Self::AssemblyFailed(m)
            | Self::StorageFailed(m)
            | Self::Internal(m) => m,
        }
    }

    /// Whether a local retry with backoff is worthwhile.
    ///
    /// Rate limits, timeouts, and transient network failures are retryable;
    /// validation and auth failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRateLimited(_)
                | Self::UpstreamNetwork(_)
                | Self::ProviderRateLimited(_)
                | Self::ProviderTimeout(_)
        )
    }

    /// The HTTP status this error surfaces as on request/response endpoints.
    ///
    /// The streaming podcast endpoint never uses this; it always returns 200
    /// and delivers failures as terminal `error` events.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::UpstreamNotFound(_) => 404,
            Self::UpstreamRateLimited(_) => 429,
            _ => 500,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::StorageFailed(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;
