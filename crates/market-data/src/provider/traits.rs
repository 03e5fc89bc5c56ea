//! Exchange provider trait definitions.
//!
//! This module defines the `ExchangeProvider` lifecycle contract. The data
//! itself is served by feature handlers registered alongside the provider
//! (see [`HandlerTable`](super::HandlerTable)), so the trait only covers
//! identity, connection setup and teardown.

use async_trait::async_trait;

use crate::errors::MarketDataError;

/// A pooled client for one exchange and market type.
///
/// Instances are constructed lazily by the provider registry, connected once
/// and closed on registry shutdown.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use marketlink_data::provider::ExchangeProvider;
///
/// struct BinanceSpot {
///     http: reqwest::Client,
/// }
///
/// #[async_trait]
/// impl ExchangeProvider for BinanceSpot {
///     fn name(&self) -> &str {
///         "binance"
///     }
///
///     async fn close(&self) -> Result<(), MarketDataError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ExchangeProvider: Send + Sync + 'static {
    /// Exchange identifier used in logs and errors.
    fn name(&self) -> &str;

    /// One-time connection setup, run right after construction.
    ///
    /// Default implementation does nothing.
    async fn connect(&self) -> Result<(), MarketDataError> {
        Ok(())
    }

    /// Release every resource held by the instance.
    async fn close(&self) -> Result<(), MarketDataError>;
}
