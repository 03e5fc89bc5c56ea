//! Immutable request description and its fluent builder.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::types::{DataFeature, InstrumentType, MarketType, Timeframe, TransportKind};
use crate::errors::MarketDataError;

/// A validated market-data request.
///
/// Built once through [`DataRequestBuilder`] and never mutated afterwards.
/// Components that need a variation (for example one chunk window of a larger
/// historical request) derive a new request instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataRequest {
    feature: DataFeature,
    transport: TransportKind,
    exchange: String,
    market_type: MarketType,
    instrument_type: InstrumentType,
    symbol: Option<String>,
    symbols: Vec<String>,
    timeframe: Option<Timeframe>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    limit: Option<u32>,
    depth: Option<u32>,
    period: Option<String>,
    update_speed: Option<String>,
    only_closed: bool,
    throttle_ms: Option<u64>,
    max_chunks: Option<usize>,
    from_id: Option<String>,
    extra_params: Map<String, Value>,
}

impl DataRequest {
    pub fn builder() -> DataRequestBuilder {
        DataRequestBuilder::new()
    }

    pub fn feature(&self) -> DataFeature {
        self.feature
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn market_type(&self) -> MarketType {
        self.market_type
    }

    pub fn instrument_type(&self) -> InstrumentType {
        self.instrument_type
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Every requested symbol, single or batch.
    pub fn all_symbols(&self) -> Vec<&str> {
        match &self.symbol {
            Some(symbol) => vec![symbol.as_str()],
            None => self.symbols.iter().map(String::as_str).collect(),
        }
    }

    pub fn timeframe(&self) -> Option<Timeframe> {
        self.timeframe
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn depth(&self) -> Option<u32> {
        self.depth
    }

    pub fn period(&self) -> Option<&str> {
        self.period.as_deref()
    }

    pub fn update_speed(&self) -> Option<&str> {
        self.update_speed.as_deref()
    }

    pub fn only_closed(&self) -> bool {
        self.only_closed
    }

    pub fn throttle_ms(&self) -> Option<u64> {
        self.throttle_ms
    }

    pub fn max_chunks(&self) -> Option<usize> {
        self.max_chunks
    }

    pub fn from_id(&self) -> Option<&str> {
        self.from_id.as_deref()
    }

    pub fn extra_params(&self) -> &Map<String, Value> {
        &self.extra_params
    }

    /// Derive the request for one bounded sub-call.
    pub(crate) fn for_chunk(
        &self,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        limit: u32,
        from_id: Option<String>,
    ) -> DataRequest {
        let mut chunk = self.clone();
        chunk.start_time = start_time.or(self.start_time);
        chunk.end_time = end_time.or(self.end_time);
        chunk.limit = Some(limit);
        chunk.depth = None;
        chunk.max_chunks = None;
        chunk.from_id = from_id.or_else(|| self.from_id.clone());
        chunk
    }
}

/// Fluent builder for [`DataRequest`].
///
/// Defaults for exchange and market type can be supplied up front so hosts
/// with a configured default exchange only set what differs.
#[derive(Debug, Clone, Default)]
pub struct DataRequestBuilder {
    feature: Option<DataFeature>,
    transport: Option<TransportKind>,
    exchange: Option<String>,
    market_type: Option<MarketType>,
    instrument_type: Option<InstrumentType>,
    symbol: Option<String>,
    symbols: Vec<String>,
    timeframe: Option<Timeframe>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    limit: Option<u32>,
    depth: Option<u32>,
    period: Option<String>,
    update_speed: Option<String>,
    only_closed: bool,
    throttle_ms: Option<u64>,
    max_chunks: Option<usize>,
    from_id: Option<String>,
    extra_params: Map<String, Value>,
    default_exchange: Option<String>,
    default_market_type: Option<MarketType>,
}

impl DataRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(
        default_exchange: Option<String>,
        default_market_type: Option<MarketType>,
    ) -> Self {
        Self {
            default_exchange,
            default_market_type,
            ..Self::default()
        }
    }

    pub fn for_ohlcv(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self::new()
            .feature(DataFeature::Ohlcv)
            .transport(TransportKind::Rest)
            .symbol(symbol)
            .timeframe(timeframe)
    }

    pub fn for_order_book(symbol: impl Into<String>, depth: u32) -> Self {
        Self::new()
            .feature(DataFeature::OrderBook)
            .transport(TransportKind::Rest)
            .symbol(symbol)
            .depth(depth)
    }

    pub fn for_trades(symbol: impl Into<String>) -> Self {
        Self::new()
            .feature(DataFeature::Trades)
            .transport(TransportKind::Rest)
            .symbol(symbol)
    }

    pub fn feature(mut self, feature: DataFeature) -> Self {
        self.feature = Some(feature);
        self
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn market_type(mut self, market_type: MarketType) -> Self {
        self.market_type = Some(market_type);
        self
    }

    pub fn instrument_type(mut self, instrument_type: InstrumentType) -> Self {
        self.instrument_type = Some(instrument_type);
        self
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    pub fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    pub fn update_speed(mut self, update_speed: impl Into<String>) -> Self {
        self.update_speed = Some(update_speed.into());
        self
    }

    pub fn only_closed(mut self, only_closed: bool) -> Self {
        self.only_closed = only_closed;
        self
    }

    pub fn throttle_ms(mut self, throttle_ms: u64) -> Self {
        self.throttle_ms = Some(throttle_ms);
        self
    }

    pub fn max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = Some(max_chunks);
        self
    }

    pub fn from_id(mut self, from_id: impl Into<String>) -> Self {
        self.from_id = Some(from_id.into());
        self
    }

    pub fn extra_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_params.insert(key.into(), value);
        self
    }

    /// Validate and freeze the request.
    pub fn build(self) -> Result<DataRequest, MarketDataError> {
        let feature = self.feature.ok_or_else(|| invalid("feature is required"))?;
        let transport = self
            .transport
            .ok_or_else(|| invalid("transport is required"))?;
        let exchange = self
            .exchange
            .or(self.default_exchange)
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| invalid("exchange must be provided (no default set)"))?;
        let market_type = self
            .market_type
            .or(self.default_market_type)
            .ok_or_else(|| invalid("market_type must be provided (no default set)"))?;
        let instrument_type = self
            .instrument_type
            .unwrap_or_else(|| market_type.default_instrument_types()[0]);

        let symbol = self
            .symbol
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if symbol.is_some() && !self.symbols.is_empty() {
            return Err(invalid("set either symbol or symbols, not both"));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(invalid("symbols must not contain empty entries"));
        }
        if symbol.is_none() && self.symbols.is_empty() && feature.requires_symbol(transport) {
            return Err(invalid(&format!("symbol is required for {}", feature)));
        }
        if feature == DataFeature::Ohlcv && self.timeframe.is_none() {
            return Err(invalid("timeframe is required for ohlcv"));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(invalid("start_time must not be after end_time"));
            }
        }
        if self.limit == Some(0) {
            return Err(invalid("limit must be positive"));
        }
        if self.depth == Some(0) {
            return Err(invalid("depth must be positive"));
        }
        if self.max_chunks == Some(0) {
            return Err(invalid("max_chunks must be positive"));
        }

        Ok(DataRequest {
            feature,
            transport,
            exchange,
            market_type,
            instrument_type,
            symbol,
            symbols: self.symbols,
            timeframe: self.timeframe,
            start_time: self.start_time,
            end_time: self.end_time,
            limit: self.limit,
            depth: self.depth,
            period: self.period,
            update_speed: self.update_speed,
            only_closed: self.only_closed,
            throttle_ms: self.throttle_ms,
            max_chunks: self.max_chunks,
            from_id: self.from_id,
            extra_params: self.extra_params,
        })
    }
}

fn invalid(message: &str) -> MarketDataError {
    MarketDataError::InvalidRequest {
        message: message.to_string(),
    }
}
