//! Request router.
//!
//! `route` and `route_stream` run the same pipeline:
//! 1. Validate against the capability table (no provider touched on failure)
//! 2. Resolve every symbol to a canonical spec, then to the native spelling
//! 3. Look up the handler and the pooled provider
//! 4. Invoke the handler with normalized arguments
//!
//! Concurrent calls share only the provider pool and the symbol cache.

use std::sync::Arc;

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::context::RuntimeContext;
use crate::errors::MarketDataError;
use crate::models::{DataRequest, InstrumentSpec, InstrumentType, MarketType, Payload, TransportKind};
use crate::provider::{EventStream, FeatureHandler, HandlerArgs, ProviderHandle};

pub struct DataRouter {
    context: Arc<RuntimeContext>,
}

impl DataRouter {
    pub fn new(context: Arc<RuntimeContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.context
    }

    /// Serve a point query.
    pub async fn route(&self, request: &DataRequest) -> Result<Payload, MarketDataError> {
        let (handle, handler, args) = self.prepare(request, CancellationToken::new()).await?;
        debug!(
            "Routing {} ({}) to {} {}",
            request.feature(),
            request.transport(),
            handle.exchange(),
            handle.market_type()
        );
        handler.call(&handle, args).await
    }

    /// Open a live stream.
    ///
    /// The returned stream owns the upstream connection; cancelling or
    /// dropping it closes that connection.
    pub async fn route_stream(&self, request: &DataRequest) -> Result<EventStream, MarketDataError> {
        if request.transport() != TransportKind::Ws {
            return Err(MarketDataError::InvalidRequest {
                message: format!(
                    "streaming requires the ws transport, got {}",
                    request.transport()
                ),
            });
        }

        let token = CancellationToken::new();
        let (handle, handler, args) = self.prepare(request, token.clone()).await?;
        let label = stream_label(request);
        debug!("Opening stream {}", label);
        let subscription = handler.subscribe(&handle, args).await?;
        Ok(EventStream::new(label, subscription, token))
    }

    /// Shut down every pooled provider.
    pub async fn close(&self) -> Result<(), MarketDataError> {
        self.context.providers().shutdown().await
    }

    async fn prepare(
        &self,
        request: &DataRequest,
        cancellation: CancellationToken,
    ) -> Result<(ProviderHandle, FeatureHandler, HandlerArgs), MarketDataError> {
        self.context.capabilities().validate(request)?;

        let (instruments, natives) = self.resolve_symbols(request).await?;

        let providers = self.context.providers();
        let handler = providers.get_handler(request.exchange(), request.feature(), request.transport())?;
        let handle = providers
            .get_provider(request.exchange(), request.market_type())
            .await?;

        let (symbol, symbols) = if request.symbol().is_some() {
            (natives.into_iter().next(), Vec::new())
        } else {
            (None, natives)
        };

        let args = HandlerArgs {
            market_type: request.market_type(),
            symbol,
            symbols,
            instruments,
            timeframe: request.timeframe(),
            start_time: request.start_time(),
            end_time: request.end_time(),
            limit: request.limit().or(request.depth()),
            period: request.period().map(str::to_string),
            update_speed: request.update_speed().map(str::to_string),
            only_closed: request.only_closed(),
            throttle_ms: request.throttle_ms(),
            max_chunks: request.max_chunks(),
            from_id: request.from_id().map(str::to_string),
            extra: request.extra_params().clone(),
            cancellation,
        };
        Ok((handle, handler, args))
    }

    /// Canonical specs and native symbols, in request order.
    ///
    /// Exchanges registered without a mapper receive the raw symbol.
    async fn resolve_symbols(
        &self,
        request: &DataRequest,
    ) -> Result<(Vec<InstrumentSpec>, Vec<String>), MarketDataError> {
        let symbols = self.context.symbols();
        let exchange = request.exchange();
        let market_type = request.market_type();
        let has_mapper = symbols.has_mapper(exchange);

        let raw = request.all_symbols();
        let mut specs = Vec::with_capacity(raw.len());
        let mut natives = Vec::with_capacity(raw.len());
        for value in raw {
            let mut spec = symbols.resolve(value, exchange, market_type).await?;
            if market_type == MarketType::Futures && spec.instrument_type == InstrumentType::Spot {
                spec = spec.with_instrument_type(InstrumentType::Perpetual);
            }
            let native = if has_mapper {
                symbols.to_native(&spec, exchange, market_type)?
            } else {
                value.to_string()
            };
            specs.push(spec);
            natives.push(native);
        }
        Ok((specs, natives))
    }
}

fn stream_label(request: &DataRequest) -> String {
    let symbols = request.all_symbols();
    format!(
        "{}:{}:{}:{}",
        request.exchange(),
        request.market_type(),
        request.feature(),
        if symbols.is_empty() {
            "*".to_string()
        } else {
            symbols.join(",")
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::models::{DataFeature, DataRequestBuilder, Timeframe};
    use crate::provider::{ExchangeProvider, HandlerTable, StreamConnection, StreamSubscription};
    use crate::registry::ProviderRegistration;
    use crate::symbol::QuoteSuffixMapper;
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        constructed: AtomicUsize,
        calls: AtomicUsize,
        closes: AtomicUsize,
    }

    struct MockExchange {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl ExchangeProvider for MockExchange {
        fn name(&self) -> &str {
            "binance"
        }

        async fn close(&self) -> Result<(), MarketDataError> {
            Ok(())
        }
    }

    struct MockConnection {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl StreamConnection for MockConnection {
        async fn close(&self) -> Result<(), MarketDataError> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn router(counters: Arc<Counters>) -> DataRouter {
        let context = RuntimeContext::new(RuntimeConfig::default()).unwrap();
        let factory_counters = counters.clone();
        let handlers = HandlerTable::new()
            .rest(DataFeature::Ohlcv, |p: Arc<MockExchange>, args: HandlerArgs| async move {
                p.counters.calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({
                    "symbol": args.symbol,
                    "timeframe": args.timeframe.map(|t| t.as_str()),
                    "limit": args.limit,
                }))
            })
            .rest(DataFeature::OrderBook, |_p: Arc<MockExchange>, args: HandlerArgs| async move {
                Ok(json!({ "depth": args.limit }))
            })
            .stream(DataFeature::Trades, |p: Arc<MockExchange>, args: HandlerArgs| async move {
                let events = futures::stream::iter(
                    (0..3).map(|i| Ok(json!({ "trade": i }))),
                );
                assert_eq!(args.symbol.as_deref(), Some("ETHUSDT"));
                Ok(StreamSubscription::new(
                    events,
                    MockConnection {
                        counters: p.counters.clone(),
                    },
                ))
            });
        context
            .register_provider(
                ProviderRegistration::new(
                    "binance",
                    [MarketType::Spot, MarketType::Futures],
                    move |_| {
                        let counters = factory_counters.clone();
                        async move {
                            counters.constructed.fetch_add(1, Ordering::SeqCst);
                            Ok(MockExchange { counters })
                        }
                    },
                )
                .with_handlers(handlers)
                .with_mapper(Arc::new(QuoteSuffixMapper::concatenated("binance"))),
            )
            .unwrap();
        DataRouter::new(Arc::new(context))
    }

    fn spot() -> DataRequestBuilder {
        DataRequestBuilder::new()
            .exchange("binance")
            .market_type(MarketType::Spot)
    }

    #[tokio::test]
    async fn test_route_normalizes_symbol() {
        let counters = Arc::new(Counters::default());
        let router = router(counters.clone());
        let request = DataRequestBuilder::for_ohlcv("btc/usdt", Timeframe::H1)
            .exchange("binance")
            .market_type(MarketType::Spot)
            .limit(10)
            .build()
            .unwrap();

        let payload = router.route(&request).await.unwrap();
        assert_eq!(
            payload,
            json!({ "symbol": "BTCUSDT", "timeframe": "1h", "limit": 10 })
        );
        router.route(&request).await.unwrap();
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_depth_maps_to_limit() {
        let router = router(Arc::new(Counters::default()));
        let request = DataRequestBuilder::for_order_book("BTCUSDT", 50)
            .exchange("binance")
            .market_type(MarketType::Spot)
            .build()
            .unwrap();
        assert_eq!(router.route(&request).await.unwrap(), json!({ "depth": 50 }));
    }

    #[tokio::test]
    async fn test_unsupported_capability_fails_before_provider() {
        let counters = Arc::new(Counters::default());
        let router = router(counters.clone());
        let request = spot()
            .feature(DataFeature::FundingRates)
            .transport(TransportKind::Rest)
            .symbol("BTCUSDT")
            .build()
            .unwrap();

        let err = router.route(&request).await.unwrap_err();
        assert!(matches!(err, MarketDataError::Capability(_)));
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_handler() {
        let router = router(Arc::new(Counters::default()));
        let request = spot()
            .feature(DataFeature::Trades)
            .transport(TransportKind::Rest)
            .symbol("BTCUSDT")
            .build()
            .unwrap();
        assert!(matches!(
            router.route(&request).await,
            Err(MarketDataError::HandlerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_route_stream_requires_ws() {
        let router = router(Arc::new(Counters::default()));
        let request = DataRequestBuilder::for_ohlcv("BTCUSDT", Timeframe::M1)
            .exchange("binance")
            .market_type(MarketType::Spot)
            .build()
            .unwrap();
        assert!(matches!(
            router.route_stream(&request).await,
            Err(MarketDataError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_cancel_closes_connection_once() {
        let counters = Arc::new(Counters::default());
        let router = router(counters.clone());
        let request = spot()
            .feature(DataFeature::Trades)
            .transport(TransportKind::Ws)
            .symbol("ETH/USDT")
            .build()
            .unwrap();

        let mut stream = router.route_stream(&request).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), json!({ "trade": 0 }));
        stream.cancel().await.unwrap();
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        drop(stream);
        tokio::task::yield_now().await;
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_rejects_later_requests() {
        let router = router(Arc::new(Counters::default()));
        router.close().await.unwrap();
        let request = DataRequestBuilder::for_ohlcv("BTCUSDT", Timeframe::M1)
            .exchange("binance")
            .market_type(MarketType::Spot)
            .build()
            .unwrap();
        assert!(matches!(
            router.route(&request).await,
            Err(MarketDataError::RegistryClosed)
        ));
    }
}
