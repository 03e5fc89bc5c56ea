//! Property-based integration tests for chunk planning and execution.
//!
//! These tests verify that window plans tile the requested range and that
//! stitching overlapping windows never yields duplicate rows.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use marketlink_data::chunking::{Coverage, PlanMode};
use marketlink_data::{
    ChunkExecutor, ChunkPage, ChunkPlanner, ChunkPolicy, DataRequest, DataRequestBuilder,
    MarketType, Timeframe,
};

// =============================================================================
// Generators
// =============================================================================

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

/// A minute-bar request starting anywhere in the first hour, spanning up to
/// five hours, with arbitrary sub-minute offsets on both ends.
fn arb_range() -> impl Strategy<Value = (DateTime<Utc>, DateTime<Utc>)> {
    (0i64..3600, 0i64..18_000).prop_map(|(offset, span)| {
        let start = epoch() + Duration::seconds(offset);
        (start, start + Duration::seconds(span))
    })
}

fn request(start: DateTime<Utc>, end: DateTime<Utc>) -> DataRequest {
    DataRequestBuilder::for_ohlcv("BTCUSDT", Timeframe::M1)
        .exchange("binance")
        .market_type(MarketType::Spot)
        .start_time(start)
        .end_time(end)
        .build()
        .unwrap()
}

fn floor_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp();
    Utc.timestamp_opt(secs - secs.rem_euclid(60), 0).unwrap()
}

fn ceil_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_minute(t);
    if floored == t {
        t
    } else {
        floored + Duration::minutes(1)
    }
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_windows_tile_aligned_range((start, end) in arb_range(), page in 1u32..60) {
        let policy = ChunkPolicy::new(page).unwrap().with_max_chunks(100_000);
        let plan = ChunkPlanner::new("binance.ohlcv", policy)
            .plan(&request(start, end))
            .unwrap();

        prop_assert_eq!(plan.mode, PlanMode::Window);
        prop_assert_eq!(plan.coverage, Coverage::Complete);
        prop_assert_eq!(plan.chunks.first().unwrap().start, Some(floor_minute(start)));
        prop_assert_eq!(plan.chunks.last().unwrap().end, Some(ceil_minute(end)));

        for pair in plan.chunks.windows(2) {
            prop_assert_eq!(pair[0].end, pair[1].start);
            prop_assert!(pair[0].start < pair[0].end);
        }

        let points = (ceil_minute(end) - floor_minute(start)).num_minutes() as u32 + 1;
        let total: u32 = plan.chunks.iter().map(|c| c.limit).sum();
        prop_assert_eq!(total, points);
        prop_assert!(plan.chunks.iter().all(|c| c.limit >= 1 && c.limit <= page));
    }

    #[test]
    fn prop_window_count_never_exceeds_max_chunks(
        (start, end) in arb_range(),
        page in 1u32..20,
        max_chunks in 1usize..10,
    ) {
        let policy = ChunkPolicy::new(page).unwrap().with_max_chunks(max_chunks);
        let plan = ChunkPlanner::new("binance.ohlcv", policy)
            .plan(&request(start, end))
            .unwrap();
        prop_assert!(plan.len() <= max_chunks);
    }

    #[test]
    fn prop_overlapping_windows_stitch_without_duplicates(
        (start, end) in arb_range(),
        page in 1u32..30,
    ) {
        let policy = ChunkPolicy::new(page).unwrap().with_max_chunks(100_000);
        let plan = ChunkPlanner::new("binance.ohlcv", policy)
            .plan(&request(start, end))
            .unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(ChunkExecutor::new().execute(
            &plan,
            |window| async move {
                // Inclusive on both ends, so neighbouring windows share a row.
                let (Some(from), Some(to)) = (window.start, window.end) else {
                    return Ok(ChunkPage::new(Vec::new()));
                };
                let rows: Vec<i64> = (0..)
                    .map(|i| from + Duration::minutes(i))
                    .take_while(|t| *t <= to)
                    .map(|t| t.timestamp_millis())
                    .collect();
                Ok(ChunkPage::new(rows))
            },
            |row: &i64| *row,
        ));

        prop_assert!(result.error.is_none());
        prop_assert!(result.rows.windows(2).all(|pair| pair[0] < pair[1]));
        let points = (ceil_minute(end) - floor_minute(start)).num_minutes() as usize + 1;
        prop_assert_eq!(result.rows.len(), points);
        prop_assert_eq!(result.chunks_used, plan.len());
    }
}
