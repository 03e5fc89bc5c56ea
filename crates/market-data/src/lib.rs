//! Marketlink Market Data Crate
//!
//! Routes market-data requests for crypto exchanges to pluggable provider
//! implementations, validating every request against a static capability
//! table before any provider is touched.
//!
//! # Overview
//!
//! The crate supports:
//! - Capability validation with ranked alternatives for unsupported requests
//! - Exchange-independent symbols (`BTC/USDT`, `urm://binance:btc/usdt:perpetual`)
//! - Lazily constructed, pooled provider instances
//! - Chunked historical fetches that respect per-call limits
//! - Fan-out of live streams to pluggable sinks with backpressure
//!
//! # Architecture
//!
//! ```text
//! +--------------------+             +--------------------+
//! | HistoricalFetcher  |             |    StreamRelay     |  (sinks, backpressure)
//! | Planner / Executor |             +--------------------+
//! +--------------------+                       |
//!           |                                  |
//!           v                                  v
//! +--------------------------------------------------------+
//! |                       DataRouter                       |
//! +--------------------------------------------------------+
//!           |                  |                  |
//!           v                  v                  v
//! +------------------+ +------------------+ +------------------+
//! |CapabilityService | | SymbolNormalizer | | ProviderRegistry |
//! | (table lookups)  | | (single-flight)  | |  (pooled, lazy)  |
//! +------------------+ +------------------+ +------------------+
//! ```
//!
//! Everything hangs off one [`RuntimeContext`], built once from a
//! [`RuntimeConfig`] and shared by reference.
//!
//! # Core Types
//!
//! - [`DataRequest`] - Immutable description of one call
//! - [`InstrumentSpec`] - Canonical instrument identity
//! - [`CapabilityKey`] / [`CapabilityStatus`] - Support lookups and outcomes
//! - [`ProviderRegistration`] - Factory, handler table and symbol mapper for an exchange
//! - [`ChunkPolicy`] / [`ChunkPlan`] / [`ChunkResult`] - Paginated history
//! - [`EventSink`] - Destination for relayed events

pub mod capability;
pub mod chunking;
pub mod config;
pub mod context;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;
pub mod relay;
pub mod router;
pub mod symbol;

pub use capability::{
    CapabilityKey, CapabilityRegistry, CapabilityService, CapabilitySource, CapabilityStatus,
};
pub use chunking::{
    ChunkExecutor, ChunkPage, ChunkPlan, ChunkPlanner, ChunkPolicy, ChunkResult, ChunkWindow,
    HistoricalFetcher, OnThrottle, OverflowPolicy,
};
pub use config::{BackpressurePolicy, RelayConfig, RuntimeConfig};
pub use context::RuntimeContext;
pub use errors::{
    CapabilityError, MarketDataError, RelayError, RetryClass, SinkError, SymbolResolutionError,
};
pub use models::{
    DataFeature, DataRequest, DataRequestBuilder, InstrumentSpec, InstrumentType, MarketType,
    OptionSide, Payload, Timeframe, TransportKind,
};
pub use provider::{
    EventStream, ExchangeProvider, HandlerArgs, HandlerTable, ProviderHandle, StreamConnection,
    StreamSubscription,
};
pub use registry::{ProviderRegistration, ProviderRegistry};
pub use relay::{EventSink, InMemorySink, RelayMetricsSnapshot, StreamRelay};
pub use router::DataRouter;
pub use symbol::{QuoteSuffixMapper, SymbolMapper, SymbolNormalizer};
