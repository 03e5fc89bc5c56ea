//! End-to-end routing scenarios exercised through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::StreamExt;
use serde_json::{json, Value};

use marketlink_data::chunking::ChunkOutcome;
use marketlink_data::{
    ChunkPolicy, DataFeature, DataRequestBuilder, DataRouter, ExchangeProvider, HandlerArgs,
    HandlerTable, HistoricalFetcher, MarketDataError, MarketType, ProviderRegistration,
    QuoteSuffixMapper, RuntimeConfig, RuntimeContext, StreamConnection, StreamSubscription,
    Timeframe, TransportKind,
};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct Counters {
    constructed: AtomicUsize,
    fetches: AtomicUsize,
    closes: AtomicUsize,
}

struct FakeExchange {
    counters: Arc<Counters>,
    /// Ignore the per-call limit and return the whole inclusive window.
    overlapping: bool,
}

#[async_trait]
impl ExchangeProvider for FakeExchange {
    fn name(&self) -> &str {
        "binance"
    }

    async fn close(&self) -> Result<(), MarketDataError> {
        Ok(())
    }
}

struct FakeConnection {
    counters: Arc<Counters>,
}

#[async_trait]
impl StreamConnection for FakeConnection {
    async fn close(&self) -> Result<(), MarketDataError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn t(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
}

/// One bar per minute between `start` and `end`, inclusive.
fn bars(args: &HandlerArgs, overlapping: bool) -> Value {
    let (Some(start), Some(end)) = (args.start_time, args.end_time) else {
        return json!([]);
    };
    let mut rows = Vec::new();
    let mut at = start;
    while at <= end {
        if !overlapping && rows.len() as u32 >= args.limit.unwrap_or(u32::MAX) {
            break;
        }
        rows.push(json!({ "timestamp": at.timestamp_millis(), "close": 100 }));
        at += Duration::minutes(1);
    }
    json!({ "bars": rows })
}

fn router(counters: Arc<Counters>, overlapping: bool) -> Arc<DataRouter> {
    let mut config = RuntimeConfig::default();
    config.set_chunk_policy("binance", DataFeature::Ohlcv, ChunkPolicy::new(2).unwrap());
    let context = RuntimeContext::new(config).unwrap();

    let handlers = HandlerTable::new()
        .rest(DataFeature::Ohlcv, |p: Arc<FakeExchange>, args: HandlerArgs| async move {
            p.counters.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(bars(&args, p.overlapping))
        })
        .stream(DataFeature::Trades, |p: Arc<FakeExchange>, _args: HandlerArgs| async move {
            let events = futures::stream::iter(
                (0..100).map(|i| Ok::<_, MarketDataError>(json!({ "trade": i }))),
            );
            Ok(StreamSubscription::new(
                events,
                FakeConnection {
                    counters: p.counters.clone(),
                },
            ))
        });

    let factory_counters = counters.clone();
    context
        .register_provider(
            ProviderRegistration::new(
                "binance",
                [MarketType::Spot, MarketType::Futures],
                move |_| {
                    let counters = factory_counters.clone();
                    async move {
                        counters.constructed.fetch_add(1, Ordering::SeqCst);
                        Ok(FakeExchange {
                            counters,
                            overlapping,
                        })
                    }
                },
            )
            .with_handlers(handlers)
            .with_mapper(Arc::new(QuoteSuffixMapper::concatenated("binance"))),
        )
        .unwrap();
    Arc::new(DataRouter::new(Arc::new(context)))
}

fn five_minutes_of_bars() -> marketlink_data::DataRequest {
    DataRequestBuilder::for_ohlcv("BTC/USDT", Timeframe::M1)
        .exchange("binance")
        .market_type(MarketType::Spot)
        .start_time(t(0))
        .end_time(t(4))
        .build()
        .unwrap()
}

fn timestamps(rows: &[Value]) -> Vec<i64> {
    rows.iter()
        .map(|row| row["timestamp"].as_i64().unwrap())
        .collect()
}

// =============================================================================
// Chunked history
// =============================================================================

#[tokio::test]
async fn test_chunked_history_stitches_five_rows_in_three_chunks() {
    let counters = Arc::new(Counters::default());
    let router = router(counters.clone(), false);
    let request = five_minutes_of_bars();

    let fetcher = HistoricalFetcher::for_request(router, &request).unwrap();
    let plan = fetcher.planner().plan(&request).unwrap();
    let limits: Vec<u32> = plan.chunks.iter().map(|c| c.limit).collect();
    assert_eq!(limits, vec![2, 2, 1]);

    let result = fetcher.fetch(&request).await.unwrap();
    assert!(result.error.is_none());
    assert_eq!(result.chunks_used, 3);
    assert_eq!(result.outcome(), ChunkOutcome::Complete);
    assert_eq!(
        timestamps(&result.rows),
        (0..5).map(|m| t(m).timestamp_millis()).collect::<Vec<_>>()
    );
    assert_eq!(counters.fetches.load(Ordering::SeqCst), 3);
    assert_eq!(counters.constructed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_overlapping_windows_do_not_duplicate_rows() {
    let router = router(Arc::new(Counters::default()), true);
    let request = five_minutes_of_bars();

    let result = HistoricalFetcher::for_request(router, &request)
        .unwrap()
        .fetch(&request)
        .await
        .unwrap();

    let stamps = timestamps(&result.rows);
    assert_eq!(stamps.len(), 5);
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_history_without_policy_is_configuration_error() {
    let router = router(Arc::new(Counters::default()), false);
    let request = DataRequestBuilder::for_trades("BTCUSDT")
        .exchange("binance")
        .market_type(MarketType::Spot)
        .build()
        .unwrap();
    assert!(matches!(
        HistoricalFetcher::for_request(router, &request),
        Err(MarketDataError::Configuration { .. })
    ));
}

// =============================================================================
// Unsupported capability
// =============================================================================

#[tokio::test]
async fn test_spot_liquidations_rejected_before_provider_construction() {
    let counters = Arc::new(Counters::default());
    let router = router(counters.clone(), false);
    let request = DataRequestBuilder::new()
        .feature(DataFeature::Liquidations)
        .transport(TransportKind::Ws)
        .exchange("binance")
        .market_type(MarketType::Spot)
        .symbol("BTCUSDT")
        .build()
        .unwrap();

    let err = match router.route_stream(&request).await {
        Err(MarketDataError::Capability(err)) => err,
        Err(other) => panic!("expected a capability error, got {other:?}"),
        Ok(_) => panic!("spot liquidations must be rejected"),
    };
    assert_eq!(counters.constructed.load(Ordering::SeqCst), 0);
    assert!(err.recommendations().iter().any(|key| {
        key.exchange == "binance"
            && key.market_type == MarketType::Futures
            && key.feature == DataFeature::Liquidations
    }));
}

// =============================================================================
// Stream cancellation
// =============================================================================

#[tokio::test]
async fn test_cancelling_stream_closes_connection_exactly_once() {
    let counters = Arc::new(Counters::default());
    let router = router(counters.clone(), false);
    let request = DataRequestBuilder::new()
        .feature(DataFeature::Trades)
        .transport(TransportKind::Ws)
        .exchange("binance")
        .market_type(MarketType::Spot)
        .symbol("BTC/USDT")
        .build()
        .unwrap();

    let mut stream = router.route_stream(&request).await.unwrap();
    for expected in 0..3 {
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            json!({ "trade": expected })
        );
    }

    stream.cancel().await.unwrap();
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert!(stream.next().await.is_none());

    stream.cancel().await.unwrap();
    drop(stream);
    tokio::task::yield_now().await;
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropping_stream_closes_connection() {
    let counters = Arc::new(Counters::default());
    let router = router(counters.clone(), false);
    let request = DataRequestBuilder::new()
        .feature(DataFeature::Trades)
        .transport(TransportKind::Ws)
        .exchange("binance")
        .market_type(MarketType::Spot)
        .symbol("BTCUSDT")
        .build()
        .unwrap();

    let mut stream = router.route_stream(&request).await.unwrap();
    stream.next().await.unwrap().unwrap();
    drop(stream);

    for _ in 0..10 {
        if counters.closes.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}
