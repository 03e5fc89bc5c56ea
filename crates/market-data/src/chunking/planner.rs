//! Chunk planning.
//!
//! Splits a historical request into endpoint-legal sub-requests:
//! - **window** mode: start (and optionally end) given with a timeframe;
//!   the aligned range is cut into consecutive windows of `page_size` bars
//!   sharing their boundaries. Without an end, windows run up to "now" and
//!   never exceed `max_chunks` (or [`DEFAULT_OPEN_ENDED_MAX_CHUNKS`])
//! - **limit** mode: no time range; the requested limit is cut into pages
//! - **cursor** mode: a single sentinel chunk; the executor follows the
//!   cursor returned by each page

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::policy::{ChunkPolicy, OverflowPolicy, WeightPolicy};
use crate::errors::MarketDataError;
use crate::models::{DataRequest, Timeframe};

/// Window cap for an open-ended backfill when neither the request nor the
/// policy sets `max_chunks`.
pub const DEFAULT_OPEN_ENDED_MAX_CHUNKS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    Window,
    Limit,
    Cursor,
}

/// How much of the requested range the plan covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    Complete,
    /// Windows beyond `max_chunks` were dropped.
    Truncated,
    /// The range was shrunk to `max_chunks * page_size` points.
    Clamped,
}

/// One bounded sub-request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkWindow {
    pub index: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: u32,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkPlan {
    pub endpoint: String,
    pub mode: PlanMode,
    pub chunks: Vec<ChunkWindow>,
    pub coverage: Coverage,
    pub page_size: u32,
    pub max_chunks: Option<usize>,
    /// Total rows wanted, when the request set a limit.
    pub total_limit: Option<u64>,
    pub timeframe: Option<Timeframe>,
    #[serde(skip)]
    pub weight: Option<WeightPolicy>,
}

impl ChunkPlan {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// First and last instants covered by a window plan.
    pub fn range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.chunks.first()?.start?;
        let end = self.chunks.last()?.end?;
        Some((start, end))
    }
}

/// Plans chunks for one endpoint.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    endpoint: String,
    policy: ChunkPolicy,
}

impl ChunkPlanner {
    pub fn new(endpoint: impl Into<String>, policy: ChunkPolicy) -> Self {
        Self {
            endpoint: endpoint.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &ChunkPolicy {
        &self.policy
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn plan(&self, request: &DataRequest) -> Result<ChunkPlan, MarketDataError> {
        self.plan_at(request, Utc::now())
    }

    /// Plan with an explicit "now" anchoring open-ended backfills.
    pub fn plan_at(
        &self,
        request: &DataRequest,
        now: DateTime<Utc>,
    ) -> Result<ChunkPlan, MarketDataError> {
        self.policy.validate()?;
        if self.policy.requires_start_time && request.start_time().is_none() {
            return Err(MarketDataError::configuration(format!(
                "start_time is required for chunking {}",
                self.endpoint
            )));
        }

        let max_points = self.policy.max_points();
        let page_size = request.limit().map_or(max_points, |l| l.min(max_points));
        let max_chunks = match (request.max_chunks(), self.policy.max_chunks) {
            (Some(requested), Some(allowed)) => Some(requested.min(allowed)),
            (requested, allowed) => requested.or(allowed),
        };

        let mut plan = ChunkPlan {
            endpoint: self.endpoint.clone(),
            mode: PlanMode::Limit,
            chunks: Vec::new(),
            coverage: Coverage::Complete,
            page_size,
            max_chunks,
            total_limit: request.limit().map(u64::from),
            timeframe: request.timeframe(),
            weight: self.policy.weight.clone(),
        };

        if self.policy.is_cursor_paginated() {
            plan.mode = PlanMode::Cursor;
            plan.chunks.push(ChunkWindow {
                index: 0,
                start: request.start_time(),
                end: request.end_time(),
                limit: page_size,
                cursor: request.from_id().map(str::to_string),
            });
        } else if let Some(start) = request.start_time() {
            plan.mode = PlanMode::Window;
            let timeframe = request.timeframe().ok_or_else(|| {
                MarketDataError::configuration("timeframe is required for time-window chunking")
            })?;
            self.plan_windows(&mut plan, timeframe, start, request.end_time(), now)?;
        } else {
            self.plan_pages(&mut plan, request);
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            mode = ?plan.mode,
            chunks = plan.chunks.len(),
            page_size = plan.page_size,
            coverage = ?plan.coverage,
            "chunk plan created"
        );
        Ok(plan)
    }

    fn plan_windows(
        &self,
        plan: &mut ChunkPlan,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), MarketDataError> {
        let start = timeframe.floor(start);
        let end = match end {
            Some(end) => timeframe.ceil(end),
            None => {
                plan.max_chunks.get_or_insert(DEFAULT_OPEN_ENDED_MAX_CHUNKS);
                timeframe.floor(now)
            }
        };
        if end < start {
            return Err(MarketDataError::configuration(
                "start_time is after the latest available bar",
            ));
        }

        let step = timeframe.seconds();
        let mut points = ((end - start).num_seconds() / step) as u64 + 1;
        if let Some(total) = plan.total_limit {
            points = points.min(total);
        }

        let page = u64::from(plan.page_size);
        let mut count = points.div_ceil(page) as usize;
        if !self.policy.supports_auto_chunking && count > 1 {
            count = 1;
            plan.coverage = Coverage::Truncated;
        }
        if let Some(max) = plan.max_chunks {
            if count > max {
                count = max;
                match self.policy.overflow {
                    OverflowPolicy::Strict => plan.coverage = Coverage::Truncated,
                    OverflowPolicy::Clamp => {
                        points = max as u64 * page;
                        plan.coverage = Coverage::Clamped;
                    }
                }
            }
        }

        let last = start + Duration::seconds(step * (points as i64 - 1));
        let window = Duration::seconds(step * page as i64);
        plan.chunks = (0..count)
            .map(|index| {
                let offset = index as u64 * page;
                let window_start = start + Duration::seconds(step * offset as i64);
                ChunkWindow {
                    index,
                    start: Some(window_start),
                    end: Some((window_start + window).min(last)),
                    limit: page.min(points - offset) as u32,
                    cursor: None,
                }
            })
            .collect();
        Ok(())
    }

    fn plan_pages(&self, plan: &mut ChunkPlan, request: &DataRequest) {
        let page = u64::from(plan.page_size);
        let total = plan.total_limit.unwrap_or(page);
        let mut count = total.div_ceil(page) as usize;
        if !self.policy.supports_auto_chunking && count > 1 {
            count = 1;
            plan.coverage = Coverage::Truncated;
        }
        if let Some(max) = plan.max_chunks {
            if count > max {
                count = max;
                plan.coverage = match self.policy.overflow {
                    OverflowPolicy::Strict => Coverage::Truncated,
                    OverflowPolicy::Clamp => Coverage::Clamped,
                };
            }
        }

        plan.chunks = (0..count)
            .map(|index| {
                let offset = index as u64 * page;
                ChunkWindow {
                    index,
                    start: None,
                    end: request.end_time(),
                    limit: page.min(total - offset) as u32,
                    cursor: (index == 0)
                        .then(|| request.from_id().map(str::to_string))
                        .flatten(),
                }
            })
            .collect();
    }
}
