//! Error types and retry classification for the routing engine.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all engine operations
//! - [`CapabilityError`], [`SymbolResolutionError`], [`RelayError`], [`SinkError`]:
//!   structured payloads for the failures callers usually inspect
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use std::time::Duration;

use thiserror::Error;

use crate::capability::{CapabilityKey, CapabilityStatus};
use crate::models::MarketType;

/// Default wait suggested when a provider rate limits without a hint.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// A requested (exchange, market, instrument, feature, transport) is unsupported.
///
/// Carries the full status so callers can surface the ranked alternatives.
#[derive(Error, Debug, Clone)]
#[error("Capability not supported: {key}. {reason}")]
pub struct CapabilityError {
    pub key: CapabilityKey,
    pub reason: String,
    pub status: CapabilityStatus,
}

impl CapabilityError {
    pub fn new(key: CapabilityKey, status: CapabilityStatus) -> Self {
        let reason = status
            .reason
            .clone()
            .unwrap_or_else(|| "No reason provided".to_string());
        Self {
            key,
            reason,
            status,
        }
    }

    /// Ranked alternatives, best first.
    pub fn recommendations(&self) -> &[CapabilityKey] {
        &self.status.recommendations
    }
}

/// A symbol string could not be mapped for an exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot resolve symbol '{value}' on {exchange} ({market_type}): {message}")]
pub struct SymbolResolutionError {
    pub exchange: String,
    pub value: String,
    pub market_type: MarketType,
    pub known_aliases: Vec<String>,
    pub message: String,
}

impl SymbolResolutionError {
    pub fn new(
        exchange: impl Into<String>,
        value: impl Into<String>,
        market_type: MarketType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            value: value.into(),
            market_type,
            known_aliases: Vec::new(),
            message: message.into(),
        }
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.known_aliases = aliases;
        self
    }
}

/// A sink was detached after too many consecutive publish failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Sink '{sink}' detached after {consecutive_failures} consecutive failures: {last_error}")]
pub struct RelayError {
    pub sink: String,
    pub consecutive_failures: u32,
    pub last_error: String,
}

/// Failure reported by an event sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Sink error: {message}")]
pub struct SinkError {
    pub message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One provider instance that failed to close during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    pub exchange: String,
    pub market_type: MarketType,
    pub message: String,
}

/// Errors that can occur while routing market data requests.
///
/// Each variant is classified into a [`RetryClass`] via the
/// [`retry_class`](Self::retry_class) method.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The capability table has no supported entry for the request.
    /// Never retried.
    #[error(transparent)]
    Capability(Box<CapabilityError>),

    /// The symbol string is unknown to the exchange's mapper.
    /// Never retried.
    #[error(transparent)]
    SymbolResolution(#[from] SymbolResolutionError),

    /// Transport or provider failure.
    #[error("Provider error: {provider} - {message}")]
    Provider {
        /// The provider that returned the error
        provider: String,
        /// The error message from the provider
        message: String,
        /// HTTP-like status code when the transport reports one
        status_code: Option<u16>,
        /// Whether a caller retry may succeed
        retryable: bool,
    },

    /// The provider rate limited the request (HTTP 429).
    #[error("Rate limited: {provider} (retry after {}s)", .retry_after.as_secs())]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
        /// Minimum wait before retrying
        retry_after: Duration,
        /// Status code reported by the provider
        status_code: u16,
    },

    /// A provider call exceeded its deadline.
    /// Treated as a retryable provider failure.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// Planning-time misconfiguration, such as a missing anchor time.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A sink exceeded its consecutive failure threshold.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// A sink rejected an event.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The request failed validation.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Exchange not registered: {exchange}")]
    ExchangeNotRegistered { exchange: String },

    #[error("Market type '{market_type}' not supported by provider '{exchange}'")]
    MarketTypeNotSupported {
        exchange: String,
        market_type: MarketType,
    },

    #[error("No handler found for {feature} ({transport}) on {exchange}")]
    HandlerNotFound {
        exchange: String,
        feature: String,
        transport: String,
    },

    #[error("Exchange already registered: {exchange}")]
    DuplicateRegistration { exchange: String },

    /// The provider registry has been shut down.
    #[error("Provider registry is closed")]
    RegistryClosed,

    /// One or more pooled providers failed to close.
    /// Every failure is reported, not only the first.
    #[error("Shutdown failed for {} provider(s)", .failures.len())]
    ShutdownFailed { failures: Vec<CloseFailure> },
}

impl MarketDataError {
    /// Non-retryable provider failure.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code: None,
            retryable: false,
        }
    }

    /// Retryable provider failure, optionally tagged with a status code.
    pub fn transient(
        provider: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
            retryable: true,
        }
    }

    /// Rate limit failure; falls back to [`DEFAULT_RETRY_AFTER`].
    pub fn rate_limited(provider: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
            status_code: 429,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use marketlink_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::rate_limited("binance", None);
    /// assert_eq!(error.retry_class(), RetryClass::AfterDelay);
    ///
    /// let error = MarketDataError::configuration("start_time is required");
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited { .. } => RetryClass::AfterDelay,

            Self::Timeout { .. } | Self::Provider {
                retryable: true, ..
            } => RetryClass::WithBackoff,

            Self::Provider {
                retryable: false, ..
            }
            | Self::Capability(_)
            | Self::SymbolResolution(_)
            | Self::Configuration { .. }
            | Self::Relay(_)
            | Self::Sink(_)
            | Self::InvalidRequest { .. }
            | Self::ExchangeNotRegistered { .. }
            | Self::MarketTypeNotSupported { .. }
            | Self::HandlerNotFound { .. }
            | Self::DuplicateRegistration { .. }
            | Self::RegistryClosed
            | Self::ShutdownFailed { .. } => RetryClass::Never,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_class().is_retryable()
    }

    /// Provider-suggested wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Status code reported by the transport, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Provider { status_code, .. } => *status_code,
            Self::RateLimited { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

impl From<CapabilityError> for MarketDataError {
    fn from(err: CapabilityError) -> Self {
        Self::Capability(Box::new(err))
    }
}

impl From<reqwest::Error> for MarketDataError {
    fn from(err: reqwest::Error) -> Self {
        let provider = err
            .url()
            .and_then(|url| url.host_str())
            .unwrap_or("http")
            .to_string();

        if err.is_timeout() {
            return Self::Timeout { provider };
        }

        match err.status() {
            Some(status) if status.as_u16() == 429 => Self::rate_limited(provider, None),
            Some(status) => Self::Provider {
                provider,
                message: err.to_string(),
                status_code: Some(status.as_u16()),
                retryable: status.is_server_error(),
            },
            None => Self::Provider {
                provider,
                message: err.to_string(),
                status_code: None,
                retryable: err.is_connect() || err.is_request(),
            },
        }
    }
}
