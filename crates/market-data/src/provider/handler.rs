//! Feature handler table.
//!
//! Handlers are typed closures over a concrete provider type, erased at
//! registration time into a `(feature, transport) -> handler` map. Lookups
//! are plain map reads.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::stream::StreamSubscription;
use super::traits::ExchangeProvider;
use crate::errors::MarketDataError;
use crate::models::{
    DataFeature, InstrumentSpec, MarketType, Payload, Timeframe, TransportKind,
};

/// Normalized parameters handed to a feature handler.
///
/// Symbols are already in the exchange's native spelling.
#[derive(Debug, Clone, Default)]
pub struct HandlerArgs {
    pub market_type: MarketType,
    pub symbol: Option<String>,
    pub symbols: Vec<String>,
    /// Canonical specs, aligned with `symbol` followed by `symbols`.
    pub instruments: Vec<InstrumentSpec>,
    pub timeframe: Option<Timeframe>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Row limit; order book depth is passed here too.
    pub limit: Option<u32>,
    pub period: Option<String>,
    pub update_speed: Option<String>,
    pub only_closed: bool,
    pub throttle_ms: Option<u64>,
    pub max_chunks: Option<usize>,
    pub from_id: Option<String>,
    pub extra: Map<String, Value>,
    /// Cancelled when the consumer stops a stream.
    pub cancellation: CancellationToken,
}

/// A pooled provider instance as seen by handlers.
///
/// Holds the same instance twice: once for lifecycle calls and once
/// type-erased so handlers can recover their concrete provider type.
#[derive(Clone)]
pub struct ProviderHandle {
    exchange: String,
    market_type: MarketType,
    instance: Arc<dyn ExchangeProvider>,
    erased: Arc<dyn Any + Send + Sync>,
}

impl ProviderHandle {
    pub fn new<P: ExchangeProvider>(
        exchange: impl Into<String>,
        market_type: MarketType,
        provider: Arc<P>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            market_type,
            instance: provider.clone(),
            erased: provider,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn market_type(&self) -> MarketType {
        self.market_type
    }

    pub fn provider(&self) -> &Arc<dyn ExchangeProvider> {
        &self.instance
    }

    /// Recover the concrete provider type.
    pub fn downcast<P: ExchangeProvider>(&self) -> Result<Arc<P>, MarketDataError> {
        self.erased.clone().downcast::<P>().map_err(|_| {
            MarketDataError::provider(
                &self.exchange,
                format!(
                    "handler expects provider type {}",
                    std::any::type_name::<P>()
                ),
            )
        })
    }

    /// Whether two handles share the same pooled instance.
    pub fn same_instance(&self, other: &ProviderHandle) -> bool {
        Arc::ptr_eq(&self.erased, &other.erased)
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("exchange", &self.exchange)
            .field("market_type", &self.market_type)
            .field("provider", &self.instance.name())
            .finish()
    }
}

pub type RestFuture = BoxFuture<'static, Result<Payload, MarketDataError>>;
pub type StreamFuture = BoxFuture<'static, Result<StreamSubscription, MarketDataError>>;

type RestFn = dyn Fn(&ProviderHandle, HandlerArgs) -> Result<RestFuture, MarketDataError>
    + Send
    + Sync;
type StreamFn = dyn Fn(&ProviderHandle, HandlerArgs) -> Result<StreamFuture, MarketDataError>
    + Send
    + Sync;

/// A registered feature handler.
#[derive(Clone)]
pub enum FeatureHandler {
    /// Point query returning one payload.
    Rest(Arc<RestFn>),
    /// Live subscription returning a payload stream.
    Stream(Arc<StreamFn>),
}

impl FeatureHandler {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    pub async fn call(
        &self,
        handle: &ProviderHandle,
        args: HandlerArgs,
    ) -> Result<Payload, MarketDataError> {
        match self {
            Self::Rest(handler) => handler(handle, args)?.await,
            Self::Stream(_) => Err(MarketDataError::InvalidRequest {
                message: "streaming handler cannot serve a point query".to_string(),
            }),
        }
    }

    pub async fn subscribe(
        &self,
        handle: &ProviderHandle,
        args: HandlerArgs,
    ) -> Result<StreamSubscription, MarketDataError> {
        match self {
            Self::Stream(handler) => handler(handle, args)?.await,
            Self::Rest(_) => Err(MarketDataError::InvalidRequest {
                message: "point handler cannot serve a stream".to_string(),
            }),
        }
    }
}

impl fmt::Debug for FeatureHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rest(_) => f.write_str("FeatureHandler::Rest"),
            Self::Stream(_) => f.write_str("FeatureHandler::Stream"),
        }
    }
}

/// Static `(feature, transport) -> handler` table built at registration.
#[derive(Debug, Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<(DataFeature, TransportKind), FeatureHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a REST point-query handler for `feature`.
    pub fn rest<P, F, Fut>(mut self, feature: DataFeature, handler: F) -> Self
    where
        P: ExchangeProvider,
        F: Fn(Arc<P>, HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, MarketDataError>> + Send + 'static,
    {
        let erased: Arc<RestFn> = Arc::new(move |handle: &ProviderHandle, args: HandlerArgs| {
            let provider = handle.downcast::<P>()?;
            Ok(Box::pin(handler(provider, args)) as RestFuture)
        });
        self.handlers
            .insert((feature, TransportKind::Rest), FeatureHandler::Rest(erased));
        self
    }

    /// Register a websocket streaming handler for `feature`.
    pub fn stream<P, F, Fut>(mut self, feature: DataFeature, handler: F) -> Self
    where
        P: ExchangeProvider,
        F: Fn(Arc<P>, HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StreamSubscription, MarketDataError>> + Send + 'static,
    {
        let erased: Arc<StreamFn> =
            Arc::new(move |handle: &ProviderHandle, args: HandlerArgs| {
                let provider = handle.downcast::<P>()?;
                Ok(Box::pin(handler(provider, args)) as StreamFuture)
            });
        self.handlers
            .insert((feature, TransportKind::Ws), FeatureHandler::Stream(erased));
        self
    }

    pub fn get(&self, feature: DataFeature, transport: TransportKind) -> Option<&FeatureHandler> {
        self.handlers.get(&(feature, transport))
    }

    /// Registered keys, sorted for stable output.
    pub fn keys(&self) -> Vec<(DataFeature, TransportKind)> {
        let mut keys: Vec<_> = self.handlers.keys().copied().collect();
        keys.sort_by_key(|(feature, transport)| (feature.as_str(), transport.as_str()));
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
