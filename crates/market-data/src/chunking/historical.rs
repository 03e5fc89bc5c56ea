//! Chunked historical fetches over the router.

use std::sync::Arc;

use chrono::DateTime;
use serde_json::Value;

use super::executor::{ChunkExecutor, ChunkPage, ChunkResult};
use super::planner::ChunkPlanner;
use super::policy::{ChunkHint, ChunkPolicy};
use crate::errors::MarketDataError;
use crate::models::{DataRequest, Payload};
use crate::router::DataRouter;

/// Plans, fetches and stitches a historical request through [`DataRouter`].
///
/// Handlers are expected to return either a JSON array of rows or an
/// object holding the rows under `bars` or `data`. Each row carries its
/// timestamp under the policy hint's `timestamp_key`.
pub struct HistoricalFetcher {
    router: Arc<DataRouter>,
    planner: ChunkPlanner,
    executor: ChunkExecutor,
}

impl HistoricalFetcher {
    pub fn new(router: Arc<DataRouter>, endpoint: impl Into<String>, policy: ChunkPolicy) -> Self {
        Self {
            router,
            planner: ChunkPlanner::new(endpoint, policy),
            executor: ChunkExecutor::new(),
        }
    }

    /// Use the policy configured for the request's exchange and feature.
    pub fn for_request(
        router: Arc<DataRouter>,
        request: &DataRequest,
    ) -> Result<Self, MarketDataError> {
        let endpoint = format!("{}.{}", request.exchange(), request.feature());
        let policy = router
            .context()
            .chunk_policy(request.exchange(), request.feature())
            .cloned()
            .ok_or_else(|| {
                MarketDataError::configuration(format!("no chunk policy configured for {}", endpoint))
            })?;
        Ok(Self::new(router, endpoint, policy))
    }

    pub fn with_executor(mut self, executor: ChunkExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn planner(&self) -> &ChunkPlanner {
        &self.planner
    }

    /// Fetch every chunk of `request`.
    ///
    /// Planning errors are returned directly; fetch errors are carried in
    /// the result next to the rows collected before them.
    pub async fn fetch(&self, request: &DataRequest) -> Result<ChunkResult<Value>, MarketDataError> {
        let plan = self.planner.plan(request)?;
        let hint = &self.planner.policy().hint;

        let result = self
            .executor
            .execute(
                &plan,
                |window| {
                    let chunk =
                        request.for_chunk(window.start, window.end, window.limit, window.cursor);
                    let router = self.router.clone();
                    async move {
                        let payload = router.route(&chunk).await?;
                        Ok(page_from_payload(payload, hint))
                    }
                },
                |row: &Value| row_timestamp(row, &hint.timestamp_key).unwrap_or(i64::MIN),
            )
            .await;
        Ok(result)
    }
}

/// Split a handler payload into rows and the next cursor.
///
/// Rows without a readable timestamp are dropped.
fn page_from_payload(payload: Payload, hint: &ChunkHint) -> ChunkPage<Value> {
    let next_cursor = hint
        .cursor_field
        .as_deref()
        .and_then(|field| payload.get(field))
        .and_then(|value| match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

    let rows = match payload {
        Value::Array(rows) => rows,
        Value::Object(mut object) => ["bars", "data"]
            .iter()
            .find_map(|field| match object.remove(*field) {
                Some(Value::Array(rows)) => Some(rows),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    let total = rows.len();
    let rows: Vec<Value> = rows
        .into_iter()
        .filter(|row| row_timestamp(row, &hint.timestamp_key).is_some())
        .collect();
    if rows.len() < total {
        tracing::warn!(
            dropped = total - rows.len(),
            timestamp_key = %hint.timestamp_key,
            "rows without timestamp dropped"
        );
    }

    let page = ChunkPage::new(rows);
    match next_cursor {
        Some(cursor) => page.with_cursor(cursor),
        None => page,
    }
}

/// Epoch milliseconds from an integer, an RFC 3339 string, or the first
/// element of an array row.
fn row_timestamp(row: &Value, key: &str) -> Option<i64> {
    let value = match row {
        Value::Array(items) => items.first()?,
        Value::Object(object) => object.get(key)?,
        _ => return None,
    };
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|t| t.timestamp_millis())),
        _ => None,
    }
}
