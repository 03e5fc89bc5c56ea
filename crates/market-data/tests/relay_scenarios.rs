//! Stream relay scenarios exercised through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use marketlink_data::{
    BackpressurePolicy, DataFeature, DataRequest, DataRequestBuilder, DataRouter, EventSink,
    ExchangeProvider, HandlerArgs, HandlerTable, InMemorySink, MarketDataError, MarketType,
    Payload, ProviderRegistration, RelayConfig, RuntimeConfig, RuntimeContext, SinkError,
    StreamConnection, StreamRelay, StreamSubscription, TransportKind,
};

struct TradeExchange {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ExchangeProvider for TradeExchange {
    fn name(&self) -> &str {
        "bybit"
    }

    async fn close(&self) -> Result<(), MarketDataError> {
        Ok(())
    }
}

struct TradeConnection {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamConnection for TradeConnection {
    async fn close(&self) -> Result<(), MarketDataError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Rejects every event.
struct UnreachableBroker {
    attempts: AtomicUsize,
}

#[async_trait]
impl EventSink for UnreachableBroker {
    fn name(&self) -> &str {
        "broker"
    }

    async fn publish(&self, _event: &Payload) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::new("connection refused"))
    }
}

/// A bybit router whose trade stream emits `count` events, `gap` apart.
fn router(count: usize, gap: Duration, closes: Arc<AtomicUsize>) -> Arc<DataRouter> {
    let context = RuntimeContext::new(RuntimeConfig::default()).unwrap();
    let handlers = HandlerTable::new().stream(
        DataFeature::Trades,
        move |p: Arc<TradeExchange>, _args: HandlerArgs| async move {
            let events = futures::stream::iter(0..count).then(move |i| async move {
                tokio::time::sleep(gap).await;
                Ok::<_, MarketDataError>(json!({ "seq": i, "price": 64000 + i }))
            });
            Ok(StreamSubscription::new(
                events,
                TradeConnection {
                    closes: p.closes.clone(),
                },
            ))
        },
    );
    context
        .register_provider(
            ProviderRegistration::new("bybit", [MarketType::Spot], move |_| {
                let closes = closes.clone();
                async move { Ok(TradeExchange { closes }) }
            })
            .with_handlers(handlers),
        )
        .unwrap();
    Arc::new(DataRouter::new(Arc::new(context)))
}

fn trades() -> DataRequest {
    DataRequestBuilder::new()
        .feature(DataFeature::Trades)
        .transport(TransportKind::Ws)
        .exchange("bybit")
        .market_type(MarketType::Spot)
        .symbol("BTC/USDT")
        .build()
        .unwrap()
}

#[tokio::test(flavor = "current_thread")]
async fn test_drop_policy_detaches_failing_sink_without_dropping_healthy_events() {
    let closes = Arc::new(AtomicUsize::new(0));
    let router = router(12, Duration::from_millis(10), closes.clone());
    let config = RelayConfig {
        backpressure: BackpressurePolicy::Drop,
        buffer_size: 1,
        ..RelayConfig::default()
    };
    let relay = StreamRelay::new(router, config).unwrap();

    let broker = Arc::new(UnreachableBroker {
        attempts: AtomicUsize::new(0),
    });
    let memory = Arc::new(InMemorySink::new("memory", 64));
    relay.add_sink(broker.clone()).unwrap();
    relay.add_sink(memory.clone()).unwrap();

    relay.relay(&trades()).await.unwrap();

    assert_eq!(broker.attempts.load(Ordering::SeqCst), 5);
    let errors = relay.relay_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].sink, "broker");
    assert_eq!(errors[0].consecutive_failures, 5);
    assert_eq!(relay.sinks(), vec!["memory".to_string()]);

    let metrics = relay.metrics();
    assert_eq!(metrics.dropped_for("memory"), 0);
    assert_eq!(metrics.events_published, 12);
    assert_eq!(memory.len(), 12);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    relay.stop().await.unwrap();
    assert!(memory.is_closed());
}

#[tokio::test]
async fn test_block_policy_preserves_per_sink_order() {
    let closes = Arc::new(AtomicUsize::new(0));
    let router = router(20, Duration::ZERO, closes.clone());
    let relay = StreamRelay::new(router, RelayConfig::default()).unwrap();
    let first = Arc::new(InMemorySink::new("first", 32));
    let second = Arc::new(InMemorySink::new("second", 32));
    relay.add_sink(first.clone()).unwrap();
    relay.add_sink(second.clone()).unwrap();

    relay.relay(&trades()).await.unwrap();

    for sink in [&first, &second] {
        let mut seen = Vec::new();
        while let Some(event) = sink.try_recv() {
            seen.push(event["seq"].as_u64().unwrap());
        }
        assert_eq!(seen, (0..20).collect::<Vec<u64>>());
    }
    let snapshot = serde_json::to_value(relay.metrics()).unwrap();
    assert_eq!(snapshot["events_published"], json!(40));
    assert_eq!(snapshot["events_dropped"], json!(0));
}
