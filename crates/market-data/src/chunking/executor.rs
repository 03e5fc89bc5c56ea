//! Chunk execution.
//!
//! Runs a [`ChunkPlan`] through a caller-supplied fetch function, stitching
//! pages into one strictly time-ordered, deduplicated row set. A failed
//! chunk is not retried: the rows collected so far are returned together
//! with the error.

use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::planner::{ChunkPlan, ChunkWindow, Coverage, PlanMode};
use super::policy::OnThrottle;
use crate::errors::MarketDataError;
use crate::models::Timeframe;

/// Key identifying a row across pages. Timestamps are epoch milliseconds.
pub trait DedupeKey: Eq + Hash + Clone {
    fn timestamp(&self) -> i64;
}

impl DedupeKey for i64 {
    fn timestamp(&self) -> i64 {
        *self
    }
}

impl DedupeKey for (String, i64) {
    fn timestamp(&self) -> i64 {
        self.1
    }
}

impl DedupeKey for (String, Timeframe, i64) {
    fn timestamp(&self) -> i64 {
        self.2
    }
}

/// One fetched page, already normalized into rows.
#[derive(Debug, Clone)]
pub struct ChunkPage<R> {
    pub rows: Vec<R>,
    pub next_cursor: Option<String>,
    /// Rate-limit weight reported by the call, overriding the policy.
    pub weight: Option<u32>,
    pub throttled: bool,
}

impl<R> ChunkPage<R> {
    pub fn new(rows: Vec<R>) -> Self {
        Self {
            rows,
            next_cursor: None,
            weight: None,
            throttled: false,
        }
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.next_cursor = Some(cursor.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn throttled(mut self) -> Self {
        self.throttled = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Complete,
    /// Some rows were collected, but not the whole range.
    Partial,
    /// An error occurred before any row was collected.
    Failed,
}

/// Aggregated outcome of a plan execution.
#[derive(Debug)]
pub struct ChunkResult<R> {
    pub rows: Vec<R>,
    pub chunks_used: usize,
    pub weight_consumed: u64,
    pub throttled: bool,
    pub error: Option<MarketDataError>,
    pub coverage: Coverage,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
}

impl<R> ChunkResult<R> {
    fn new(coverage: Coverage) -> Self {
        Self {
            rows: Vec::new(),
            chunks_used: 0,
            weight_consumed: 0,
            throttled: false,
            error: None,
            coverage,
            start_timestamp: None,
            end_timestamp: None,
        }
    }

    pub fn outcome(&self) -> ChunkOutcome {
        match (&self.error, self.rows.is_empty()) {
            (Some(_), true) => ChunkOutcome::Failed,
            (Some(_), false) => ChunkOutcome::Partial,
            (None, _) if self.coverage == Coverage::Truncated => ChunkOutcome::Partial,
            (None, _) => ChunkOutcome::Complete,
        }
    }

    /// Rows on success; the error when nothing was collected.
    pub fn into_rows(self) -> Result<Vec<R>, MarketDataError> {
        match self.error {
            Some(error) if self.rows.is_empty() => Err(error),
            _ => Ok(self.rows),
        }
    }
}

/// Executes chunk plans for one endpoint.
#[derive(Debug, Clone, Default)]
pub struct ChunkExecutor {
    on_throttle: OnThrottle,
    fetch_timeout: Option<Duration>,
}

impl ChunkExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_throttle(mut self, on_throttle: OnThrottle) -> Self {
        self.on_throttle = on_throttle;
        self
    }

    /// Deadline for each fetch call. Expiry surfaces as a retryable timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Execute `plan`.
    ///
    /// # Arguments
    ///
    /// * `plan` - Output of [`ChunkPlanner::plan`](super::ChunkPlanner::plan)
    /// * `fetch` - Fetches and normalizes one chunk
    /// * `dedupe_key` - Identity of a row; rows at or before the last
    ///   appended timestamp are dropped
    ///
    /// Window plans run every window. Limit and cursor plans stop at a short
    /// page, a page without a next cursor, the total limit or `max_chunks`.
    pub async fn execute<R, K, F, Fut, D>(
        &self,
        plan: &ChunkPlan,
        mut fetch: F,
        dedupe_key: D,
    ) -> ChunkResult<R>
    where
        K: DedupeKey,
        F: FnMut(ChunkWindow) -> Fut,
        Fut: Future<Output = Result<ChunkPage<R>, MarketDataError>>,
        D: Fn(&R) -> K,
    {
        let started = Instant::now();
        let mut result = ChunkResult::new(plan.coverage);
        let mut seen: HashSet<K> = HashSet::new();
        let mut last_timestamp: Option<i64> = None;
        let mut cursor: Option<String> = None;
        let mut index = 0usize;

        loop {
            let Some(window) = next_window(plan, index, cursor.take(), result.rows.len()) else {
                break;
            };
            let requested = window.limit;
            let chunk_started = Instant::now();

            let page = match self.fetch_one(&mut fetch, window, &plan.endpoint).await {
                Ok(page) => page,
                Err(error) => {
                    tracing::warn!(
                        endpoint = %plan.endpoint,
                        chunk_index = index,
                        error = %error,
                        "chunk error"
                    );
                    result.error = Some(error);
                    break;
                }
            };
            result.chunks_used += 1;

            let weight = page
                .weight
                .or_else(|| plan.weight.as_ref().map(|w| w.weight_for(requested)))
                .unwrap_or(0);
            result.weight_consumed += u64::from(weight);

            let ChunkPage {
                mut rows,
                next_cursor,
                throttled,
                ..
            } = page;
            let fetched = rows.len();
            rows.sort_by_key(|row| dedupe_key(row).timestamp());
            for row in rows {
                let key = dedupe_key(&row);
                let ts = key.timestamp();
                if last_timestamp.is_some_and(|last| ts <= last) || !seen.insert(key) {
                    continue;
                }
                last_timestamp = Some(ts);
                if result.start_timestamp.is_none() {
                    result.start_timestamp = DateTime::from_timestamp_millis(ts);
                }
                result.end_timestamp = DateTime::from_timestamp_millis(ts);
                result.rows.push(row);
            }

            tracing::debug!(
                endpoint = %plan.endpoint,
                chunk_index = index,
                rows = fetched,
                weight = weight,
                latency_ms = chunk_started.elapsed().as_millis() as u64,
                "chunk completed"
            );

            index += 1;

            if throttled {
                result.throttled = true;
                match self.on_throttle {
                    OnThrottle::Abort => break,
                    OnThrottle::Continue => {}
                    OnThrottle::Pause(delay) => tokio::time::sleep(delay).await,
                }
            }

            if plan.mode != PlanMode::Window {
                if fetched < requested as usize {
                    break;
                }
                match next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
                if plan
                    .total_limit
                    .is_some_and(|total| result.rows.len() as u64 >= total)
                {
                    break;
                }
            }
        }

        tracing::info!(
            endpoint = %plan.endpoint,
            chunks = result.chunks_used,
            rows = result.rows.len(),
            weight = result.weight_consumed,
            throttled = result.throttled,
            failed = result.error.is_some(),
            latency_ms = started.elapsed().as_millis() as u64,
            "chunk execution complete"
        );
        result
    }

    async fn fetch_one<R, F, Fut>(
        &self,
        fetch: &mut F,
        window: ChunkWindow,
        endpoint: &str,
    ) -> Result<ChunkPage<R>, MarketDataError>
    where
        F: FnMut(ChunkWindow) -> Fut,
        Fut: Future<Output = Result<ChunkPage<R>, MarketDataError>>,
    {
        match self.fetch_timeout {
            Some(deadline) => tokio::time::timeout(deadline, fetch(window))
                .await
                .map_err(|_| MarketDataError::Timeout {
                    provider: endpoint.to_string(),
                })?,
            None => fetch(window).await,
        }
    }
}

/// The chunk to fetch at `index`, or `None` when the plan is exhausted.
fn next_window(
    plan: &ChunkPlan,
    index: usize,
    cursor: Option<String>,
    collected: usize,
) -> Option<ChunkWindow> {
    match plan.mode {
        PlanMode::Window => plan.chunks.get(index).cloned(),
        PlanMode::Limit => {
            let planned = plan.chunks.get(index)?;
            Some(ChunkWindow {
                cursor: if index == 0 { planned.cursor.clone() } else { cursor },
                ..planned.clone()
            })
        }
        PlanMode::Cursor => {
            if plan.max_chunks.is_some_and(|max| index >= max) {
                return None;
            }
            let sentinel = plan.chunks.first()?;
            let remaining = plan
                .total_limit
                .map_or(u64::MAX, |total| total.saturating_sub(collected as u64));
            Some(ChunkWindow {
                index,
                limit: u64::from(sentinel.limit).min(remaining) as u32,
                cursor: if index == 0 {
                    sentinel.cursor.clone()
                } else {
                    cursor
                },
                ..sentinel.clone()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{ChunkPlanner, ChunkPolicy, WeightPolicy};
    use crate::models::{DataRequestBuilder, MarketType};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MINUTE_MS: i64 = 60_000;

    fn base_ms() -> i64 {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn window_plan(max_points: u32, minutes: i64) -> ChunkPlan {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let request = DataRequestBuilder::for_ohlcv("BTCUSDT", Timeframe::M1)
            .exchange("binance")
            .market_type(MarketType::Spot)
            .start_time(start)
            .end_time(start + chrono::Duration::minutes(minutes - 1))
            .build()
            .unwrap();
        ChunkPlanner::new("test", ChunkPolicy::new(max_points).unwrap())
            .plan(&request)
            .unwrap()
    }

    /// Serves minute bars for a window, inclusive of both boundaries.
    fn bars(window: &ChunkWindow) -> Vec<i64> {
        let start = window.start.unwrap().timestamp_millis();
        let end = window.end.unwrap().timestamp_millis();
        (start..=end).step_by(MINUTE_MS as usize).collect()
    }

    #[tokio::test]
    async fn test_overlapping_windows_stitch_without_duplicates() {
        let plan = window_plan(2, 5);
        let calls = AtomicUsize::new(0);
        let result = ChunkExecutor::new()
            .execute(
                &plan,
                |window| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(ChunkPage::new(bars(&window))) }
                },
                |ts: &i64| *ts,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.chunks_used, 3);
        let expected: Vec<i64> = (0..5).map(|i| base_ms() + i * MINUTE_MS).collect();
        assert_eq!(result.rows, expected);
        assert_eq!(result.outcome(), ChunkOutcome::Complete);
        assert_eq!(
            result.start_timestamp.map(|t| t.timestamp_millis()),
            Some(base_ms())
        );
    }

    #[tokio::test]
    async fn test_failure_returns_partial_rows_with_error() {
        let plan = window_plan(2, 6);
        let result = ChunkExecutor::new()
            .execute(
                &plan,
                |window| async move {
                    if window.index == 1 {
                        Err(MarketDataError::transient("test", "bad gateway", Some(502)))
                    } else {
                        Ok(ChunkPage::new(bars(&window)))
                    }
                },
                |ts: &i64| *ts,
            )
            .await;

        assert_eq!(result.chunks_used, 1);
        assert!(!result.rows.is_empty());
        assert!(result.error.as_ref().is_some_and(|e| e.is_retryable()));
        assert_eq!(result.outcome(), ChunkOutcome::Partial);
    }

    #[tokio::test]
    async fn test_first_chunk_failure_is_total_failure() {
        let plan = window_plan(2, 4);
        let result: ChunkResult<i64> = ChunkExecutor::new()
            .execute(
                &plan,
                |_window| async { Err(MarketDataError::provider("test", "forbidden")) },
                |ts: &i64| *ts,
            )
            .await;
        assert_eq!(result.outcome(), ChunkOutcome::Failed);
        assert!(result.into_rows().is_err());
    }

    #[tokio::test]
    async fn test_weight_from_page_or_policy() {
        let mut plan = window_plan(2, 4);
        plan.weight = Some(WeightPolicy::Static(5));
        let result = ChunkExecutor::new()
            .execute(
                &plan,
                |window| async move {
                    let page = ChunkPage::new(bars(&window));
                    Ok(if window.index == 0 { page.with_weight(1) } else { page })
                },
                |ts: &i64| *ts,
            )
            .await;
        assert_eq!(result.weight_consumed, 6);
    }

    #[tokio::test]
    async fn test_throttle_policy_is_caller_choice() {
        let plan = window_plan(2, 6);
        let throttled = |window: ChunkWindow| async move {
            Ok(ChunkPage::new(bars(&window)).throttled())
        };

        let aborted = ChunkExecutor::new()
            .with_on_throttle(OnThrottle::Abort)
            .execute(&plan, throttled, |ts: &i64| *ts)
            .await;
        assert!(aborted.throttled);
        assert_eq!(aborted.chunks_used, 1);

        let continued = ChunkExecutor::new()
            .with_on_throttle(OnThrottle::Continue)
            .execute(&plan, throttled, |ts: &i64| *ts)
            .await;
        assert!(continued.throttled);
        assert_eq!(continued.chunks_used, 3);
    }

    #[tokio::test]
    async fn test_cursor_loop_stops_on_short_page() {
        let request = DataRequestBuilder::for_trades("BTCUSDT")
            .exchange("binance")
            .market_type(MarketType::Spot)
            .build()
            .unwrap();
        let plan = ChunkPlanner::new("trades", ChunkPolicy::new(3).unwrap().with_cursor("next"))
            .plan(&request)
            .unwrap();

        // 8 trades served 3 at a time: pages of 3, 3, 2.
        let result = ChunkExecutor::new()
            .execute(
                &plan,
                |window| async move {
                    let from: i64 = window.cursor.as_deref().unwrap_or("0").parse().unwrap();
                    let rows: Vec<i64> = (from..8).take(window.limit as usize).collect();
                    let next = rows.last().map(|last| (last + 1).to_string());
                    let page = ChunkPage::new(rows);
                    Ok(match next {
                        Some(next) => page.with_cursor(next),
                        None => page,
                    })
                },
                |id: &i64| *id,
            )
            .await;

        assert_eq!(result.chunks_used, 3);
        assert_eq!(result.rows, (0..8).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let plan = window_plan(2, 2);
        let result: ChunkResult<i64> = ChunkExecutor::new()
            .with_fetch_timeout(Duration::from_millis(10))
            .execute(
                &plan,
                |_window| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(ChunkPage::new(Vec::new()))
                },
                |ts: &i64| *ts,
            )
            .await;
        assert!(matches!(result.error, Some(MarketDataError::Timeout { .. })));
        assert!(result.error.unwrap().is_retryable());
    }
}
